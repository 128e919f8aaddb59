//! Workspace Persistence
//!
//! - `WorkspaceStore` - save/load seam used by the coordinator
//! - `sqlite` - `workspace.db` implementation
//! - `autosave` - dirty tracking and save requests from running loops

pub mod autosave;
pub mod sqlite;

use std::path::Path;

use async_trait::async_trait;

use crate::models::objective::Workspace;
use crate::utils::error::AppResult;

pub use autosave::AutosaveHandle;
pub use sqlite::SqliteWorkspaceStore;

/// Durable storage of whole workspaces.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Write the full objective graph of `workspace` atomically.
    async fn save(&self, workspace: &Workspace) -> AppResult<()>;

    /// Read the workspace stored in directory `path`.
    ///
    /// Objectives that were running when saved come back `Pending`.
    async fn load(&self, path: &Path) -> AppResult<Workspace>;
}
