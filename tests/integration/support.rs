//! Shared Integration Fixtures
//!
//! - `seed_dataset` writes a small `hn_items` table with a known number of authors
//! - `TestEngine` wires a coordinator over that dataset with scripted planners
//! - polling helpers wait for objectives to reach a status

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, Connection};
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use pixlie_core::{Conversation, ConversationStatus, ToolRegistry};
use pixlie_engine::models::settings::AnalysisConfig;
use pixlie_engine::services::persistence::SqliteWorkspaceStore;
use pixlie_engine::{Coordinator, CoordinatorDeps};
use pixlie_llm::{FallbackConfig, PlanDecision, Planner, ProviderChain};
use pixlie_tools::{register_dataset_tools, DataSource, SandboxConfig, ToolSandbox, DATASET_SCHEMA};

/// Distinct authors in the seeded dataset
pub const SEEDED_AUTHORS: usize = 42;

// ============================================================================
// Dataset
// ============================================================================

/// Create `hn.db` under `dir` with two stories per author.
pub fn seed_dataset(dir: &Path, authors: usize) -> PathBuf {
    let path = dir.join("hn.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(DATASET_SCHEMA).unwrap();

    let mut id = 1i64;
    for author in 0..authors {
        for n in 0..2 {
            conn.execute(
                "INSERT INTO hn_items (id, item_type, by, time, title, score)
                 VALUES (?1, 'story', ?2, '2024-05-01 12:00:00', ?3, ?4)",
                params![
                    id,
                    format!("user{}", author),
                    format!("Story {} by user{}", n, author),
                    (id * 7) % 300
                ],
            )
            .unwrap();
            id += 1;
        }
    }
    path
}

/// Sandbox over the real dataset tools.
pub fn dataset_sandbox(dataset: &Path) -> Arc<ToolSandbox> {
    let source = DataSource::open(dataset).unwrap();
    let mut registry = ToolRegistry::new();
    register_dataset_tools(&mut registry, source).unwrap();
    Arc::new(ToolSandbox::new(registry.freeze(), SandboxConfig::default()))
}

// ============================================================================
// Engine
// ============================================================================

/// Fallback settings without waits between attempts.
pub fn no_delay_fallback(retries_per_provider: u32) -> FallbackConfig {
    FallbackConfig {
        retries_per_provider,
        delay_between_attempts_ms: 0,
        ..FallbackConfig::default()
    }
}

/// Coordinator plus the temp directory holding its dataset and workspaces.
pub struct TestEngine {
    pub dir: TempDir,
    pub dataset: PathBuf,
    pub coordinator: Arc<Coordinator>,
}

impl TestEngine {
    pub fn new(planners: Vec<Arc<dyn Planner>>) -> Self {
        Self::with_config(planners, no_delay_fallback(0), AnalysisConfig::default())
    }

    pub fn with_config(
        planners: Vec<Arc<dyn Planner>>,
        fallback: FallbackConfig,
        analysis: AnalysisConfig,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let dataset = seed_dataset(dir.path(), SEEDED_AUTHORS);
        let coordinator = build(planners, fallback, analysis, &dataset, &dir.path().join("workspaces"));
        Self {
            dir,
            dataset,
            coordinator,
        }
    }

    /// A second coordinator over the same dataset and workspaces directory.
    pub fn restart(&self, planners: Vec<Arc<dyn Planner>>) -> Arc<Coordinator> {
        build(
            planners,
            no_delay_fallback(0),
            AnalysisConfig::default(),
            &self.dataset,
            &self.workspaces_dir(),
        )
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.dir.path().join("workspaces")
    }
}

fn build(
    planners: Vec<Arc<dyn Planner>>,
    fallback: FallbackConfig,
    analysis: AnalysisConfig,
    dataset: &Path,
    workspaces_dir: &Path,
) -> Arc<Coordinator> {
    std::fs::create_dir_all(workspaces_dir).unwrap();
    Coordinator::new(CoordinatorDeps {
        chain: Arc::new(ProviderChain::new(planners).with_config(fallback)),
        sandbox: dataset_sandbox(dataset),
        store: Arc::new(SqliteWorkspaceStore::new()),
        analysis,
        workspaces_dir: workspaces_dir.to_path_buf(),
        autosave_interval: Duration::from_secs(3600),
    })
}

// ============================================================================
// Decisions
// ============================================================================

pub fn count_authors() -> PlanDecision {
    PlanDecision::InvokeTool {
        name: "query_sql".into(),
        params: json!({"query": "SELECT COUNT(DISTINCT by) AS authors FROM hn_items"}),
    }
}

pub fn answer(text: &str) -> PlanDecision {
    PlanDecision::FinalAnswer {
        text: text.into(),
        data: json!({"authors": SEEDED_AUTHORS}),
    }
}

pub fn ask(prompt: &str) -> PlanDecision {
    PlanDecision::AskUser {
        prompt: prompt.into(),
    }
}

// ============================================================================
// Polling
// ============================================================================

pub async fn wait_for_status(
    coordinator: &Coordinator,
    id: Uuid,
    status: ConversationStatus,
) -> Conversation {
    for _ in 0..1000 {
        let conversation = coordinator.conversation(id).await.unwrap();
        if conversation.status() == status {
            return conversation;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("objective {} never reached {:?}", id, status);
}

pub async fn wait_until_terminal(coordinator: &Coordinator, id: Uuid) -> Conversation {
    for _ in 0..1000 {
        let conversation = coordinator.conversation(id).await.unwrap();
        if conversation.is_terminal() {
            return conversation;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("objective {} never finished", id);
}
