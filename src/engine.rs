//! Engine Assembly
//!
//! Builds the runtime graph from an `EngineConfig`: dataset tools behind the
//! sandbox, the provider chain with its per-workspace rate limiter, the
//! workspace store and the coordinator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use pixlie_core::ToolRegistry;
use pixlie_llm::{build_chain, Planner, ProviderChain, RateLimiterRegistry};
use pixlie_tools::{register_dataset_tools, DataSource, ToolSandbox};

use crate::models::settings::EngineConfig;
use crate::services::coordinator::{Coordinator, CoordinatorDeps};
use crate::services::persistence::SqliteWorkspaceStore;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{dataset_path, ensure_dir, workspaces_dir};

/// Open the dataset and build the sandbox over the dataset tools.
pub fn build_sandbox(config: &EngineConfig) -> AppResult<Arc<ToolSandbox>> {
    let path = match &config.data_source.path {
        Some(path) => path.clone(),
        None => dataset_path()?,
    };
    let source = DataSource::open(&path)
        .map_err(|e| AppError::config(format!("{}: {}", path.display(), e)))?;

    let mut registry = ToolRegistry::new();
    register_dataset_tools(&mut registry, source)?;
    info!(dataset = %path.display(), tools = ?registry.names(), "tools registered");
    Ok(Arc::new(ToolSandbox::new(
        registry.freeze(),
        config.sandbox.clone(),
    )))
}

/// Build the provider chain in configured fallback order.
pub fn build_provider_chain(config: &EngineConfig) -> AppResult<Arc<ProviderChain>> {
    let limiter = Arc::new(RateLimiterRegistry::new(config.rate_limit.clone()));
    let chain = build_chain(&config.providers, config.fallback.clone(), Some(limiter))
        .map_err(|e| AppError::provider(e.to_string()))?;
    if config.is_offline() {
        warn!("only scripted providers configured, running offline");
    }
    info!(chain = %chain.name(), "provider chain ready");
    Ok(Arc::new(chain))
}

/// Root directory for workspaces, created if missing.
pub fn resolve_workspaces_dir(config: &EngineConfig) -> AppResult<PathBuf> {
    let dir = match &config.persistence.workspaces_dir {
        Some(dir) => dir.clone(),
        None => workspaces_dir()?,
    };
    ensure_dir(&dir)?;
    Ok(dir)
}

/// Assemble the coordinator. Must run inside a tokio runtime.
pub fn build_coordinator(config: &EngineConfig) -> AppResult<Arc<Coordinator>> {
    let sandbox = build_sandbox(config)?;
    let chain = build_provider_chain(config)?;
    let workspaces_dir = resolve_workspaces_dir(config)?;

    Ok(Coordinator::new(CoordinatorDeps {
        chain,
        sandbox,
        store: Arc::new(SqliteWorkspaceStore::new()),
        analysis: config.analysis.clone(),
        workspaces_dir,
        autosave_interval: Duration::from_secs(config.persistence.autosave_interval_secs),
    }))
}
