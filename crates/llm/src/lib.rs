//! Pixlie LLM
//!
//! Provides a unified interface for the planning side of the analysis loop:
//! - Anthropic Messages API
//! - OpenAI Chat Completions
//! - Ollama (local inference)
//! - Scripted planners for offline runs and tests
//!
//! On top of the raw providers sit the planning contract (`Planner`,
//! `PlanDecision`), the fallback chain and the per-workspace rate limiter.

pub mod anthropic;
pub mod config;
pub mod decoders;
pub mod error;
pub mod fallback;
pub mod http_client;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod plan;
pub mod planner;
pub mod provider;
pub mod rate_limit;
mod stream_collector;
pub mod types;

use std::sync::Arc;

// Re-export main types
pub use anthropic::AnthropicProvider;
pub use config::{ProviderConfig, ProviderKind};
pub use error::{LlmError, LlmResult};
pub use fallback::{
    ChainError, FailureReason, FallbackAttempt, FallbackConfig, FallbackExecutionLog,
    ProviderChain,
};
pub use http_client::build_http_client;
pub use mock::{FailingPlanner, ScriptedPlanner};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use plan::{HistoryEntry, PlanDecision, PlanOutcome, PlanRequest, Planner};
pub use planner::LlmPlanner;
pub use provider::LlmProvider;
pub use rate_limit::{RateLimitConfig, RateLimiterRegistry, TokenBucket};
pub use types::*;

// Line decoders
pub use decoders::{AnthropicDecoder, OllamaDecoder, OpenAiDecoder};

/// Create a raw provider for a configuration.
pub fn build_provider(config: &ProviderConfig) -> LlmResult<Arc<dyn LlmProvider>> {
    config
        .validate()
        .map_err(|message| LlmError::InvalidRequest { message })?;
    let provider: Arc<dyn LlmProvider> = match config.provider {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config.clone())?),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config.clone())?),
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(config.clone())?),
        ProviderKind::Mock => {
            return Err(LlmError::invalid_request("the mock provider has no HTTP backend"))
        }
    };
    Ok(provider)
}

/// Create a planner for a configuration.
///
/// `mock` entries become a [`ScriptedPlanner`]; every other provider is
/// wrapped in an [`LlmPlanner`].
pub fn build_planner(config: &ProviderConfig) -> LlmResult<Arc<dyn Planner>> {
    if config.provider == ProviderKind::Mock {
        return Ok(Arc::new(ScriptedPlanner::from_config(config)?));
    }
    let provider = build_provider(config)?;
    Ok(Arc::new(LlmPlanner::new(provider)))
}

/// Build a fallback chain from an ordered list of provider configurations.
pub fn build_chain(
    configs: &[ProviderConfig],
    fallback: FallbackConfig,
    limiter: Option<Arc<RateLimiterRegistry>>,
) -> LlmResult<ProviderChain> {
    let planners = configs
        .iter()
        .map(build_planner)
        .collect::<LlmResult<Vec<_>>>()?;
    let chain = ProviderChain::new(planners).with_config(fallback);
    Ok(match limiter {
        Some(limiter) => chain.with_rate_limiter(limiter),
        None => chain,
    })
}
