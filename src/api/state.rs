//! API State
//!
//! Shared by every handler through `State<Arc<AppState>>`.

use std::sync::Arc;
use std::time::Instant;

use pixlie_tools::ToolSandbox;

use crate::services::coordinator::Coordinator;

/// Application state for the HTTP server.
pub struct AppState {
    /// Objective lifecycle across all workspaces
    pub coordinator: Arc<Coordinator>,
    /// Tool descriptors, schemas and metrics
    pub sandbox: Arc<ToolSandbox>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Arc<Self> {
        let sandbox = coordinator.sandbox().clone();
        Arc::new(Self {
            coordinator,
            sandbox,
            start_time: Instant::now(),
        })
    }

    /// Get the uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
