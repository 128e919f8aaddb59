//! Settings Models
//!
//! Engine configuration stored in engine.json. Every section has defaults so
//! a partial file is valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use pixlie_llm::{FallbackConfig, ProviderConfig, ProviderKind, RateLimitConfig};
use pixlie_tools::SandboxConfig;

/// Engine configuration stored in engine.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Providers in fallback order
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub fallback: FallbackConfig,
    /// Per-workspace token bucket for provider calls
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub data_source: DataSourceConfig,
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![ProviderConfig::default()]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            analysis: AnalysisConfig::default(),
            providers: default_providers(),
            fallback: FallbackConfig::default(),
            rate_limit: RateLimitConfig::default(),
            sandbox: SandboxConfig::default(),
            persistence: PersistenceConfig::default(),
            data_source: DataSourceConfig::default(),
        }
    }
}

/// HTTP listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Analysis loop bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Planning calls allowed per objective
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Consecutive failures of one tool before the loop gives up
    #[serde(default = "default_max_consecutive_tool_failures")]
    pub max_consecutive_tool_failures: u32,
    /// Most recent steps sent to the planner in full
    #[serde(default = "default_context_window_steps")]
    pub context_window_steps: usize,
    /// How long an AskUser suspension waits; `None` waits forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask_user_timeout_secs: Option<u64>,
    /// Stream planner text to subscribers
    #[serde(default = "default_stream_synthesis")]
    pub stream_synthesis: bool,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_max_consecutive_tool_failures() -> u32 {
    3
}

fn default_context_window_steps() -> usize {
    6
}

fn default_stream_synthesis() -> bool {
    true
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_consecutive_tool_failures: default_max_consecutive_tool_failures(),
            context_window_steps: default_context_window_steps(),
            ask_user_timeout_secs: None,
            stream_synthesis: default_stream_synthesis(),
        }
    }
}

/// Workspace storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Root holding one directory per workspace; ~/.pixlie/workspaces when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspaces_dir: Option<PathBuf>,
    /// Period of the background save of dirty workspaces
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval_secs: u64,
}

fn default_autosave_interval() -> u64 {
    30
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            workspaces_dir: None,
            autosave_interval_secs: default_autosave_interval(),
        }
    }
}

/// Materialized Hacker News dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// SQLite file holding hn_items, entities and entity_relations; ~/.pixlie/hn.db when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Command-line overrides applied on top of the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub data: Option<PathBuf>,
}

impl EngineConfig {
    /// Apply command-line overrides
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(bind) = overrides.bind {
            self.server.bind = bind;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(data) = overrides.data {
            self.data_source.path = Some(data);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind.trim().is_empty() {
            return Err("server.bind must not be empty".to_string());
        }

        if self.analysis.max_iterations == 0 {
            return Err("analysis.max_iterations must be at least 1".to_string());
        }
        if self.analysis.max_consecutive_tool_failures == 0 {
            return Err("analysis.max_consecutive_tool_failures must be at least 1".to_string());
        }
        if self.analysis.context_window_steps == 0 {
            return Err("analysis.context_window_steps must be at least 1".to_string());
        }
        if self.analysis.ask_user_timeout_secs == Some(0) {
            return Err("analysis.ask_user_timeout_secs must be positive when set".to_string());
        }

        if self.providers.is_empty() {
            return Err("at least one provider must be configured".to_string());
        }
        for (index, provider) in self.providers.iter().enumerate() {
            provider
                .validate()
                .map_err(|e| format!("providers[{}]: {}", index, e))?;
        }

        if self.fallback.attempt_timeout_secs == 0 {
            return Err("fallback.attempt_timeout_secs must be at least 1".to_string());
        }
        self.rate_limit.validate()?;
        self.sandbox.validate()?;

        if self.persistence.autosave_interval_secs == 0 {
            return Err("persistence.autosave_interval_secs must be at least 1".to_string());
        }

        Ok(())
    }

    /// Whether every configured provider runs offline
    pub fn is_offline(&self) -> bool {
        self.providers
            .iter()
            .all(|p| p.provider.is_offline())
    }
}
