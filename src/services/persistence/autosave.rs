//! Autosave Signals
//!
//! Loops never write to disk. They mark their workspace dirty after every
//! ledger mutation and ask for an immediate save at terminal steps and AskUser
//! suspensions; the coordinator's autosave task does the writing.

use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::mpsc;

/// Cloneable handle held by every loop of the coordinator.
#[derive(Debug, Clone)]
pub struct AutosaveHandle {
    dirty: Arc<DashSet<String>>,
    requests: mpsc::UnboundedSender<String>,
}

impl AutosaveHandle {
    /// Create a handle and the receiver of immediate save requests.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (requests, rx) = mpsc::unbounded_channel();
        (
            Self {
                dirty: Arc::new(DashSet::new()),
                requests,
            },
            rx,
        )
    }

    pub fn mark_dirty(&self, workspace: &str) {
        self.dirty.insert(workspace.to_string());
    }

    pub fn is_dirty(&self, workspace: &str) -> bool {
        self.dirty.contains(workspace)
    }

    /// Clear the dirty flag before a save starts. A mutation racing the save
    /// marks the workspace again and is picked up by the next tick.
    pub fn clear(&self, workspace: &str) {
        self.dirty.remove(workspace);
    }

    /// Ask for a save as soon as possible.
    pub fn save_now(&self, workspace: &str) {
        self.mark_dirty(workspace);
        if self.requests.send(workspace.to_string()).is_err() {
            tracing::debug!(workspace, "autosave task gone, save request dropped");
        }
    }

    /// Drain the dirty set.
    pub fn take_dirty(&self) -> Vec<String> {
        let names: Vec<String> = self.dirty.iter().map(|n| n.key().clone()).collect();
        for name in &names {
            self.dirty.remove(name);
        }
        names
    }
}
