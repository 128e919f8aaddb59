//! Provider Configuration
//!
//! One [`ProviderConfig`] per entry of the engine's `providers` list. The
//! list order is the fallback order.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend a provider entry talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Ollama,
    /// Scripted decisions, no network.
    Mock,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Mock => "mock",
        }
    }

    /// Environment variable holding the API key, for hosted backends.
    pub fn key_variable(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Ollama | ProviderKind::Mock => None,
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, ProviderKind::Mock)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    /// Falls back to the kind's environment variable when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Backend specific extras; the mock backend reads its `script` here.
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.2
}

fn default_request_timeout() -> u64 {
    120
}

impl ProviderConfig {
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: None,
            base_url: None,
            model: model.into(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
            options: HashMap::new(),
        }
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        let variable = self.provider.key_variable()?;
        std::env::var(variable).ok().filter(|key| !key.is_empty())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err(format!("{} entry has no model", self.provider));
        }
        if self.max_tokens == 0 {
            return Err("max_tokens must be at least 1".to_string());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!(
                "temperature {} is outside 0.0..=2.0",
                self.temperature
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new(ProviderKind::Anthropic, "claude-3-5-sonnet-20241022")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(serde_json::to_string(&ProviderKind::OpenAi).unwrap(), "\"openai\"");
        let kind: ProviderKind = serde_json::from_str("\"ollama\"").unwrap();
        assert_eq!(kind, ProviderKind::Ollama);
        assert_eq!(ProviderKind::Mock.to_string(), "mock");
        assert!(ProviderKind::Mock.is_offline());
    }

    #[test]
    fn test_minimal_entry_gets_defaults() {
        let config: ProviderConfig =
            serde_json::from_str(r#"{"provider":"openai","model":"gpt-4o"}"#).unwrap();
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.request_timeout_secs, 120);
        assert!(config.options.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let blank = ProviderConfig::new(ProviderKind::Ollama, " ");
        assert!(blank.validate().unwrap_err().contains("ollama"));

        let hot = ProviderConfig {
            temperature: 3.5,
            ..Default::default()
        };
        assert!(hot.validate().is_err());

        let no_wait = ProviderConfig {
            request_timeout_secs: 0,
            ..Default::default()
        };
        assert!(no_wait.validate().is_err());
    }

    #[test]
    fn test_explicit_key_wins() {
        let config = ProviderConfig {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("sk-test"));
        assert_eq!(
            ProviderConfig::new(ProviderKind::Ollama, "llama3.1").resolve_api_key(),
            None
        );
    }
}
