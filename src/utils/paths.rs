//! Engine Paths
//!
//! Everything lives under `~/.pixlie/` unless the config points elsewhere:
//! `engine.json`, the dataset `hn.db`, and `workspaces/<name>/workspace.db`.

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

pub const WORKSPACE_DB_FILE: &str = "workspace.db";

pub fn pixlie_dir() -> AppResult<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".pixlie"))
        .ok_or_else(|| AppError::config("no home directory to put ~/.pixlie in"))
}

pub fn config_path() -> AppResult<PathBuf> {
    Ok(pixlie_dir()?.join("engine.json"))
}

pub fn workspaces_dir() -> AppResult<PathBuf> {
    Ok(pixlie_dir()?.join("workspaces"))
}

pub fn dataset_path() -> AppResult<PathBuf> {
    Ok(pixlie_dir()?.join("hn.db"))
}

pub fn workspace_db_path(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(WORKSPACE_DB_FILE)
}

/// `create_dir_all`, tolerating a directory that is already there.
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.is_dir() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// A workspace name becomes one directory under the workspaces root, so it
/// must not be able to name anything else.
pub fn validate_workspace_name(name: &str) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::validation("workspace name is empty"));
    }
    if name.trim() != name {
        return Err(AppError::validation(format!(
            "workspace name {:?} has surrounding whitespace",
            name
        )));
    }
    if matches!(name, "." | "..") || name.contains(['/', '\\', '\0']) {
        return Err(AppError::validation(format!(
            "workspace name {:?} is not a plain directory name",
            name
        )));
    }
    Ok(())
}
