//! SQLite Workspace Store
//!
//! One `Database` per workspace directory, opened lazily and cached. All
//! SQLite work runs on the blocking pool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use super::WorkspaceStore;
use crate::models::objective::{ObjectiveStatus, Workspace};
use crate::storage::database::Database;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::workspace_db_path;

/// `WorkspaceStore` backed by `<workspace>/workspace.db`.
#[derive(Default)]
pub struct SqliteWorkspaceStore {
    databases: DashMap<PathBuf, Database>,
}

impl SqliteWorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn database(&self, dir: &Path) -> AppResult<Database> {
        if let Some(db) = self.databases.get(dir) {
            return Ok(db.clone());
        }
        let db = Database::open(&workspace_db_path(dir))?;
        debug!(path = %dir.display(), "opened workspace database");
        self.databases.insert(dir.to_path_buf(), db.clone());
        Ok(db)
    }
}

fn workspace_name(dir: &Path) -> AppResult<String> {
    dir.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| AppError::validation(format!("Not a workspace directory: {}", dir.display())))
}

#[async_trait]
impl WorkspaceStore for SqliteWorkspaceStore {
    async fn save(&self, workspace: &Workspace) -> AppResult<()> {
        let db = self
            .database(&workspace.path)
            .map_err(|e| AppError::persistence(e.to_string()))?;
        let snapshot = workspace.clone();
        tokio::task::spawn_blocking(move || db.save_workspace(&snapshot))
            .await
            .map_err(|e| AppError::persistence(format!("save task failed: {}", e)))?
            .map_err(|e| AppError::persistence(e.to_string()))?;
        debug!(
            workspace = %workspace.name,
            objectives = workspace.objectives.len(),
            "workspace saved"
        );
        Ok(())
    }

    async fn load(&self, path: &Path) -> AppResult<Workspace> {
        let name = workspace_name(path)?;
        let db = self.database(path)?;
        let dir = path.to_path_buf();
        let mut workspace = tokio::task::spawn_blocking(move || db.load_workspace(&name, &dir))
            .await
            .map_err(|e| AppError::internal(format!("load task failed: {}", e)))??;

        for record in &mut workspace.objectives {
            if record.objective.status == ObjectiveStatus::Active {
                record.objective.status = ObjectiveStatus::Pending;
            }
        }
        info!(
            workspace = %workspace.name,
            objectives = workspace.objectives.len(),
            "workspace loaded"
        );
        Ok(workspace)
    }
}
