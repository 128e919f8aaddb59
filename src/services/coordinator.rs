//! Multi-Objective Coordinator
//!
//! Owns every objective of every open workspace. Each running objective gets
//! its own tokio task, cancellation token, reply channel and broadcast
//! channel; only the coordinator spawns and joins those tasks.
//!
//! A panic inside one loop is caught where its task is joined and turns that
//! objective `Failed`; other objectives never observe it.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pixlie_core::{Conversation, StepResult, StepType, TerminalReason};
use pixlie_llm::ProviderChain;
use pixlie_tools::ToolSandbox;

use crate::models::objective::{
    Objective, ObjectiveRecord, ObjectiveStatus, ObjectiveSummary, Workspace,
};
use crate::models::settings::AnalysisConfig;
use crate::services::analysis::{AnalysisLoop, LoopControl, LoopServices, SharedObjective};
use crate::services::persistence::{AutosaveHandle, WorkspaceStore};
use crate::services::streaming::Subscription;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{validate_workspace_name, workspace_db_path};

/// Everything the coordinator needs, injected at construction.
pub struct CoordinatorDeps {
    pub chain: Arc<ProviderChain>,
    pub sandbox: Arc<ToolSandbox>,
    pub store: Arc<dyn WorkspaceStore>,
    pub analysis: AnalysisConfig,
    /// Root under which new workspaces are created
    pub workspaces_dir: PathBuf,
    /// Period of the dirty-workspace save
    pub autosave_interval: Duration,
}

struct WorkspaceEntry {
    path: PathBuf,
    created_at: DateTime<Utc>,
    /// Objective ids in creation order
    objectives: Vec<Uuid>,
}

struct ObjectiveHandle {
    shared: Arc<SharedObjective>,
    cancel: CancellationToken,
    replies: mpsc::UnboundedSender<String>,
    /// Reply receiver while no loop owns it
    parked: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

pub struct Coordinator {
    services: Arc<LoopServices>,
    store: Arc<dyn WorkspaceStore>,
    workspaces_dir: PathBuf,
    workspaces: DashMap<String, WorkspaceEntry>,
    objectives: DashMap<Uuid, Arc<ObjectiveHandle>>,
    autosave: AutosaveHandle,
    halt: CancellationToken,
    save_lock: Mutex<()>,
    autosave_task: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// Create the coordinator and start its autosave task.
    pub fn new(deps: CoordinatorDeps) -> Arc<Self> {
        let (autosave, requests) = AutosaveHandle::new();
        let coordinator = Arc::new(Self {
            services: Arc::new(LoopServices {
                chain: deps.chain,
                sandbox: deps.sandbox,
                config: deps.analysis,
            }),
            store: deps.store,
            workspaces_dir: deps.workspaces_dir,
            workspaces: DashMap::new(),
            objectives: DashMap::new(),
            autosave,
            halt: CancellationToken::new(),
            save_lock: Mutex::new(()),
            autosave_task: Mutex::new(None),
        });

        let task = tokio::spawn(autosave_loop(
            Arc::downgrade(&coordinator),
            requests,
            deps.autosave_interval,
            coordinator.halt.clone(),
        ));
        if let Ok(mut slot) = coordinator.autosave_task.try_lock() {
            *slot = Some(task);
        }
        coordinator
    }

    pub fn sandbox(&self) -> &Arc<ToolSandbox> {
        &self.services.sandbox
    }

    // ========================================================================
    // Objectives
    // ========================================================================

    /// Create an objective and start its loop. The workspace is created (or
    /// opened from disk) on first use.
    pub async fn create_objective(&self, workspace: &str, text: &str) -> AppResult<Uuid> {
        validate_workspace_name(workspace)?;
        if text.trim().is_empty() {
            return Err(AppError::validation("objective text must not be empty"));
        }
        if self.halt.is_cancelled() {
            return Err(AppError::invalid_state("engine is shutting down"));
        }
        self.ensure_workspace(workspace).await?;

        let objective = Objective::new(workspace, text);
        let conversation = Conversation::new(objective.id, text);
        let id = objective.id;
        let handle = self.register(objective, conversation)?;
        self.autosave.mark_dirty(workspace);
        self.spawn(id, &handle).await?;

        info!(objective = %id, workspace, "objective created");
        Ok(id)
    }

    /// Cancel an objective. Terminal objectives are rejected.
    pub async fn cancel(&self, id: Uuid) -> AppResult<()> {
        let handle = self.handle(id)?;
        let status = handle.shared.objective.read().await.status;
        if status.is_terminal() {
            return Err(AppError::invalid_state(format!(
                "Objective {} is already {}",
                id, status
            )));
        }

        let running = handle.parked.lock().await.is_none();
        if running {
            info!(objective = %id, "cancelling objective");
            handle.cancel.cancel();
        } else {
            info!(objective = %id, "cancelling idle objective");
            close_objective(
                &handle.shared,
                TerminalReason::UserCancelled,
                "Cancelled by user".to_string(),
            )
            .await?;
            let workspace = handle.shared.objective.read().await.workspace.clone();
            self.autosave.save_now(&workspace);
        }
        Ok(())
    }

    /// Deliver a user reply. Queued as a follow-up when the loop is not
    /// waiting for one.
    pub async fn submit_user_response(&self, id: Uuid, text: &str) -> AppResult<()> {
        if text.trim().is_empty() {
            return Err(AppError::validation("response text must not be empty"));
        }
        let handle = self.handle(id)?;
        let status = handle.shared.objective.read().await.status;
        if status.is_terminal() {
            return Err(AppError::invalid_state(format!(
                "Objective {} is already {}",
                id, status
            )));
        }
        handle
            .replies
            .send(text.to_string())
            .map_err(|_| AppError::invalid_state(format!("Objective {} no longer accepts replies", id)))?;
        debug!(objective = %id, "user response queued");
        Ok(())
    }

    pub async fn subscribe(&self, id: Uuid) -> AppResult<Subscription> {
        let handle = self.handle(id)?;
        Ok(Subscription::open(handle.shared.clone()).await)
    }

    pub async fn conversation(&self, id: Uuid) -> AppResult<Conversation> {
        Ok(self.handle(id)?.shared.conversation().await)
    }

    pub async fn objective(&self, id: Uuid) -> AppResult<Objective> {
        Ok(self.handle(id)?.shared.objective().await)
    }

    pub async fn summary(&self, id: Uuid) -> AppResult<ObjectiveSummary> {
        let handle = self.handle(id)?;
        let objective = handle.shared.objective().await;
        let ledger = handle.shared.ledger.read().await;
        Ok(ObjectiveSummary::new(&objective, &ledger.conversation))
    }

    /// Summaries of one workspace, or of every open workspace.
    pub async fn list_objectives(&self, workspace: Option<&str>) -> AppResult<Vec<ObjectiveSummary>> {
        let mut names: Vec<String> = match workspace {
            Some(name) => {
                if !self.workspaces.contains_key(name) {
                    return Err(AppError::not_found(format!("Workspace not found: {}", name)));
                }
                vec![name.to_string()]
            }
            None => self.workspaces.iter().map(|e| e.key().clone()).collect(),
        };
        names.sort();

        let mut summaries = Vec::new();
        for name in names {
            for id in self.objective_ids(&name) {
                if let Ok(summary) = self.summary(id).await {
                    summaries.push(summary);
                }
            }
        }
        Ok(summaries)
    }

    // ========================================================================
    // Workspaces
    // ========================================================================

    /// Load a workspace directory. Its objectives are registered but not
    /// started; see [`Coordinator::resume_pending`].
    pub async fn open_workspace(&self, path: &Path) -> AppResult<String> {
        let workspace = self.store.load(path).await?;
        validate_workspace_name(&workspace.name)?;
        if self.workspaces.contains_key(&workspace.name) {
            debug!(workspace = %workspace.name, "workspace already open");
            return Ok(workspace.name);
        }

        self.workspaces.insert(
            workspace.name.clone(),
            WorkspaceEntry {
                path: workspace.path.clone(),
                created_at: workspace.created_at,
                objectives: Vec::new(),
            },
        );
        let count = workspace.objectives.len();
        for record in workspace.objectives {
            self.register(record.objective, record.conversation)?;
        }
        info!(workspace = %workspace.name, objectives = count, "workspace opened");
        Ok(workspace.name)
    }

    /// Restart every `Pending` objective of a workspace. Steps left
    /// unfinished by the previous run are failed as interrupted first.
    pub async fn resume_pending(&self, workspace: &str) -> AppResult<Vec<Uuid>> {
        if !self.workspaces.contains_key(workspace) {
            return Err(AppError::not_found(format!("Workspace not found: {}", workspace)));
        }

        let mut resumed = Vec::new();
        for id in self.objective_ids(workspace) {
            let handle = self.handle(id)?;
            if handle.shared.objective.read().await.status != ObjectiveStatus::Pending {
                continue;
            }
            if handle.parked.lock().await.is_none() {
                continue;
            }
            let interrupted = {
                let mut ledger = handle.shared.ledger.write().await;
                if ledger.conversation.is_terminal() {
                    continue;
                }
                ledger.conversation.interrupt_unfinished("interrupted")?
            };
            if !interrupted.is_empty() {
                debug!(objective = %id, steps = ?interrupted, "interrupted steps failed");
            }
            self.spawn(id, &handle).await?;
            resumed.push(id);
        }
        if !resumed.is_empty() {
            self.autosave.mark_dirty(workspace);
            info!(workspace, count = resumed.len(), "resumed pending objectives");
        }
        Ok(resumed)
    }

    /// Write a workspace now. On failure its objectives are flagged
    /// `unsaved` and stay in memory.
    pub async fn save_workspace(&self, name: &str) -> AppResult<()> {
        let _guard = self.save_lock.lock().await;
        self.autosave.clear(name);
        let snapshot = self.snapshot(name).await?;

        let result = self.store.save(&snapshot).await;
        let unsaved = result.is_err();
        for id in self.objective_ids(name) {
            if let Ok(handle) = self.handle(id) {
                handle.shared.objective.write().await.unsaved = unsaved;
            }
        }
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(workspace = name, error = %e, "workspace save failed");
                Err(match e {
                    AppError::Persistence(_) => e,
                    other => AppError::persistence(other.to_string()),
                })
            }
        }
    }

    /// Names of the open workspaces.
    pub fn workspace_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workspaces.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Stop every loop without writing terminal steps, then save everything.
    pub async fn shutdown(&self) {
        info!("coordinator shutting down");
        self.halt.cancel();

        let handles: Vec<Arc<ObjectiveHandle>> =
            self.objectives.iter().map(|e| e.value().clone()).collect();
        for handle in handles {
            let task = handle.task.lock().await.take();
            if let Some(task) = task {
                if let Err(e) = task.await {
                    warn!(error = %e, "objective supervisor ended abnormally");
                }
            }
        }
        let autosave_task = self.autosave_task.lock().await.take();
        if let Some(task) = autosave_task {
            let _ = task.await;
        }

        for name in self.workspace_names() {
            if let Err(e) = self.save_workspace(&name).await {
                error!(workspace = %name, error = %e, "final save failed");
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn handle(&self, id: Uuid) -> AppResult<Arc<ObjectiveHandle>> {
        self.objectives
            .get(&id)
            .map(|h| h.value().clone())
            .ok_or_else(|| AppError::not_found(format!("Objective not found: {}", id)))
    }

    fn objective_ids(&self, workspace: &str) -> Vec<Uuid> {
        self.workspaces
            .get(workspace)
            .map(|e| e.objectives.clone())
            .unwrap_or_default()
    }

    async fn ensure_workspace(&self, name: &str) -> AppResult<()> {
        if self.workspaces.contains_key(name) {
            return Ok(());
        }
        let path = self.workspaces_dir.join(name);
        if workspace_db_path(&path).exists() {
            self.open_workspace(&path).await?;
            return Ok(());
        }
        self.workspaces
            .entry(name.to_string())
            .or_insert_with(|| WorkspaceEntry {
                path,
                created_at: Utc::now(),
                objectives: Vec::new(),
            });
        debug!(workspace = name, "workspace created");
        Ok(())
    }

    fn register(
        &self,
        objective: Objective,
        conversation: Conversation,
    ) -> AppResult<Arc<ObjectiveHandle>> {
        let id = objective.id;
        let workspace = objective.workspace.clone();
        let (replies, inbox) = mpsc::unbounded_channel();
        let handle = Arc::new(ObjectiveHandle {
            shared: Arc::new(SharedObjective::new(objective, conversation)),
            cancel: CancellationToken::new(),
            replies,
            parked: Mutex::new(Some(inbox)),
            task: Mutex::new(None),
        });

        let mut entry = self
            .workspaces
            .get_mut(&workspace)
            .ok_or_else(|| AppError::not_found(format!("Workspace not found: {}", workspace)))?;
        entry.objectives.push(id);
        drop(entry);
        self.objectives.insert(id, handle.clone());
        Ok(handle)
    }

    async fn spawn(&self, id: Uuid, handle: &Arc<ObjectiveHandle>) -> AppResult<()> {
        let inbox = handle
            .parked
            .lock()
            .await
            .take()
            .ok_or_else(|| AppError::invalid_state(format!("Objective {} is already running", id)))?;
        handle.shared.attach_events().await;

        let control = LoopControl {
            cancel: handle.cancel.clone(),
            halt: self.halt.child_token(),
            inbox,
        };
        let analysis = AnalysisLoop::new(
            self.services.clone(),
            handle.shared.clone(),
            control,
            self.autosave.clone(),
        )
        .await;

        let shared = handle.shared.clone();
        let autosave = self.autosave.clone();
        let supervisor = tokio::spawn(async move {
            match tokio::spawn(analysis.run()).await {
                Ok(exit) => debug!(objective = %id, exit = ?exit, "objective task joined"),
                Err(e) if e.is_panic() => {
                    let message = panic_message(e.into_panic());
                    error!(objective = %id, panic = %message, "analysis loop panicked");
                    let reason = format!("Analysis loop panicked: {}", message);
                    if let Err(e) = close_objective(&shared, TerminalReason::Internal, reason).await {
                        error!(objective = %id, error = %e, "could not record loop panic");
                    }
                    let workspace = shared.objective.read().await.workspace.clone();
                    autosave.save_now(&workspace);
                }
                Err(e) => warn!(objective = %id, error = %e, "objective task aborted"),
            }
        });
        *handle.task.lock().await = Some(supervisor);
        Ok(())
    }

    async fn snapshot(&self, name: &str) -> AppResult<Workspace> {
        let (path, created_at, ids) = {
            let entry = self
                .workspaces
                .get(name)
                .ok_or_else(|| AppError::not_found(format!("Workspace not found: {}", name)))?;
            (entry.path.clone(), entry.created_at, entry.objectives.clone())
        };

        let mut objectives = Vec::with_capacity(ids.len());
        for id in ids {
            let handle = self.handle(id)?;
            let objective = handle.shared.objective().await;
            let conversation = handle.shared.conversation().await;
            objectives.push(ObjectiveRecord {
                objective,
                conversation,
            });
        }
        Ok(Workspace {
            name: name.to_string(),
            path,
            created_at,
            objectives,
        })
    }
}

/// Write a terminal step for an objective whose loop is not running (idle
/// cancel) or has died (panic), then close its stream.
async fn close_objective(
    shared: &SharedObjective,
    reason: TerminalReason,
    message: String,
) -> AppResult<()> {
    {
        let mut ledger = shared.ledger.write().await;
        if !ledger.conversation.is_terminal() {
            let open = ledger
                .conversation
                .steps()
                .iter()
                .rev()
                .find(|s| !s.status().is_finished())
                .map(|s| s.step_id());
            let step_id = match open {
                Some(id) => id,
                None => {
                    let id = ledger.conversation.begin_step(StepType::Synthesis)?;
                    ledger.conversation.start_step(id)?;
                    id
                }
            };
            let step = ledger
                .conversation
                .fail_step(step_id, StepResult::terminal(reason, message))?;
            ledger.publish_step(step);
            ledger.conversation.finish(reason)?;
        }
        ledger.events = None;
    }
    shared.objective.write().await.status = ObjectiveStatus::from_terminal(reason);
    Ok(())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn autosave_loop(
    coordinator: Weak<Coordinator>,
    mut requests: mpsc::UnboundedReceiver<String>,
    interval: Duration,
    halt: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
    ticker.tick().await;

    loop {
        let names = tokio::select! {
            _ = halt.cancelled() => break,
            request = requests.recv() => match request {
                Some(name) => vec![name],
                None => break,
            },
            _ = ticker.tick() => match coordinator.upgrade() {
                Some(c) => c.autosave.take_dirty(),
                None => break,
            },
        };
        let Some(c) = coordinator.upgrade() else { break };
        for name in names {
            match c.save_workspace(&name).await {
                Ok(()) => debug!(workspace = %name, "autosaved"),
                Err(e) => warn!(workspace = %name, error = %e, "autosave failed"),
            }
        }
    }
    debug!("autosave task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use pixlie_core::{ConversationStatus, ToolRegistry, ProviderEvent};
    use pixlie_llm::{
        FallbackConfig, LlmResult, PlanDecision, PlanOutcome, PlanRequest, Planner,
        ScriptedPlanner,
    };
    use pixlie_tools::SandboxConfig;
    use tempfile::TempDir;

    use crate::services::persistence::SqliteWorkspaceStore;

    struct PanickingPlanner;

    #[async_trait]
    impl Planner for PanickingPlanner {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn plan(&self, _request: &PlanRequest) -> LlmResult<PlanOutcome> {
            panic!("planner exploded");
        }

        async fn plan_stream(
            &self,
            _request: &PlanRequest,
            _tx: mpsc::Sender<ProviderEvent>,
        ) -> LlmResult<PlanOutcome> {
            panic!("planner exploded");
        }
    }

    /// Store that fails while `broken` is set.
    struct FlakyStore {
        inner: SqliteWorkspaceStore,
        broken: AtomicBool,
    }

    #[async_trait]
    impl WorkspaceStore for FlakyStore {
        async fn save(&self, workspace: &Workspace) -> AppResult<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(AppError::persistence("disk full"));
            }
            self.inner.save(workspace).await
        }

        async fn load(&self, path: &Path) -> AppResult<Workspace> {
            self.inner.load(path).await
        }
    }

    fn coordinator_with(
        planner: Arc<dyn Planner>,
        store: Arc<dyn WorkspaceStore>,
        dir: &TempDir,
    ) -> Arc<Coordinator> {
        let registry = ToolRegistry::new().freeze();
        let chain = ProviderChain::new(vec![planner]).with_config(FallbackConfig {
            retries_per_provider: 0,
            delay_between_attempts_ms: 0,
            ..FallbackConfig::default()
        });
        Coordinator::new(CoordinatorDeps {
            chain: Arc::new(chain),
            sandbox: Arc::new(ToolSandbox::new(registry, SandboxConfig::default())),
            store,
            analysis: AnalysisConfig::default(),
            workspaces_dir: dir.path().to_path_buf(),
            autosave_interval: Duration::from_secs(3600),
        })
    }

    fn asking() -> Arc<dyn Planner> {
        Arc::new(ScriptedPlanner::repeating(PlanDecision::AskUser {
            prompt: "Which year?".into(),
        }))
    }

    async fn wait_for(coordinator: &Coordinator, id: Uuid, status: ConversationStatus) {
        for _ in 0..400 {
            if coordinator.conversation(id).await.unwrap().status() == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("objective {} never reached {:?}", id, status);
    }

    #[tokio::test]
    async fn test_response_to_terminal_objective_is_rejected() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_with(asking(), Arc::new(SqliteWorkspaceStore::new()), &dir);
        let id = coordinator.create_objective("research", "q").await.unwrap();
        wait_for(&coordinator, id, ConversationStatus::AwaitingUser).await;

        coordinator.cancel(id).await.unwrap();
        wait_for(&coordinator, id, ConversationStatus::Cancelled).await;

        let err = coordinator.submit_user_response(id, "2024").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert!(matches!(
            coordinator.cancel(id).await.unwrap_err(),
            AppError::InvalidState(_)
        ));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_loop_fails_only_its_objective() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_with(
            Arc::new(PanickingPlanner),
            Arc::new(SqliteWorkspaceStore::new()),
            &dir,
        );
        let id = coordinator.create_objective("research", "q").await.unwrap();
        wait_for(&coordinator, id, ConversationStatus::Failed).await;

        let conv = coordinator.conversation(id).await.unwrap();
        assert_eq!(conv.terminal_reason(), Some(TerminalReason::Internal));
        assert_eq!(
            coordinator.objective(id).await.unwrap().status,
            ObjectiveStatus::Failed
        );
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_save_failure_flags_unsaved_until_next_success() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FlakyStore {
            inner: SqliteWorkspaceStore::new(),
            broken: AtomicBool::new(true),
        });
        let coordinator = coordinator_with(asking(), store.clone(), &dir);
        let id = coordinator.create_objective("research", "q").await.unwrap();
        wait_for(&coordinator, id, ConversationStatus::AwaitingUser).await;

        let err = coordinator.save_workspace("research").await.unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
        assert!(coordinator.objective(id).await.unwrap().unsaved);

        store.broken.store(false, Ordering::SeqCst);
        coordinator.save_workspace("research").await.unwrap();
        assert!(!coordinator.objective(id).await.unwrap().unsaved);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_then_resume() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_with(asking(), Arc::new(SqliteWorkspaceStore::new()), &dir);
        let id = coordinator.create_objective("research", "q").await.unwrap();
        wait_for(&coordinator, id, ConversationStatus::AwaitingUser).await;
        coordinator.shutdown().await;

        let restarted = coordinator_with(asking(), Arc::new(SqliteWorkspaceStore::new()), &dir);
        let name = restarted
            .open_workspace(&dir.path().join("research"))
            .await
            .unwrap();
        assert_eq!(
            restarted.objective(id).await.unwrap().status,
            ObjectiveStatus::Pending
        );

        assert_eq!(restarted.resume_pending(&name).await.unwrap(), vec![id]);
        wait_for(&restarted, id, ConversationStatus::AwaitingUser).await;
        let conv = restarted.conversation(id).await.unwrap();
        assert_eq!(conv.steps()[0].results().unwrap().data["interrupted"], true);
        assert_eq!(conv.steps().len(), 2);
        restarted.shutdown().await;
    }
}
