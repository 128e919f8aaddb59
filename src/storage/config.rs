//! Engine Settings File
//!
//! `engine.json` is read once at startup. A missing file is created with the
//! defaults so the user has something to edit; a file that parses but fails
//! `EngineConfig::validate` is refused rather than patched.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::models::settings::EngineConfig;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{config_path, ensure_dir};

#[derive(Debug)]
pub struct ConfigService {
    path: PathBuf,
    config: EngineConfig,
}

impl ConfigService {
    /// `~/.pixlie/engine.json`.
    pub fn new() -> AppResult<Self> {
        Self::with_path(config_path()?)
    }

    pub fn with_path(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let config = if path.exists() {
            read_config(&path)?
        } else {
            let config = EngineConfig::default();
            write_config(&path, &config)?;
            info!(path = %path.display(), "created engine config with defaults");
            config
        };
        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn into_config(self) -> EngineConfig {
        self.config
    }

    /// Validate, store and write through to disk.
    pub fn update(&mut self, config: EngineConfig) -> AppResult<()> {
        write_config(&self.path, &config)?;
        self.config = config;
        Ok(())
    }

    /// Pick up edits made to the file since it was loaded.
    pub fn reload(&mut self) -> AppResult<()> {
        self.config = read_config(&self.path)?;
        Ok(())
    }
}

fn read_config(path: &Path) -> AppResult<EngineConfig> {
    let text = fs::read_to_string(path)?;
    let config: EngineConfig = serde_json::from_str(&text)
        .map_err(|e| AppError::config(format!("{}: {}", path.display(), e)))?;
    config.validate().map_err(AppError::validation)?;
    Ok(config)
}

fn write_config(path: &Path, config: &EngineConfig) -> AppResult<()> {
    config.validate().map_err(AppError::validation)?;
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        ensure_dir(dir)?;
    }
    fs::write(path, serde_json::to_string_pretty(config)?)?;
    Ok(())
}
