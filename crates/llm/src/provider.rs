//! Raw Provider Contract
//!
//! An `LlmProvider` speaks one vendor's HTTP API. It knows nothing about
//! planning; [`crate::planner::LlmPlanner`] turns its responses into
//! `PlanDecision`s. Status codes and transport failures are mapped here onto
//! `LlmError` so the fallback chain can classify them uniformly.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::{LlmError, LlmResult};
use super::types::{LlmResponse, Message, ToolDefinition};
use pixlie_core::streaming::ProviderEvent;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Vendor label, e.g. `anthropic`.
    fn name(&self) -> &'static str;

    fn model(&self) -> &str;

    /// One blocking round trip.
    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
    ) -> LlmResult<LlmResponse>;

    /// Like `send_message`, forwarding text deltas to `tx` while the body
    /// arrives. The assembled response is returned at the end.
    async fn stream_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<ProviderEvent>,
    ) -> LlmResult<LlmResponse>;
}

pub fn missing_api_key_error(provider: &str) -> LlmError {
    LlmError::AuthenticationFailed {
        message: format!("no API key configured for {}", provider),
    }
}

/// Classify a non-2xx response.
pub fn parse_http_error(status: u16, body: &str, provider: &str) -> LlmError {
    let body = body.trim();
    match status {
        401 | 403 => LlmError::AuthenticationFailed {
            message: format!("{} rejected the credentials (HTTP {})", provider, status),
        },
        404 => LlmError::ModelNotFound {
            model: body.to_string(),
        },
        408 => LlmError::Timeout {
            message: format!("{} timed out the request", provider),
        },
        // 529 is Anthropic's "overloaded"
        429 | 529 => LlmError::RateLimited {
            message: body.to_string(),
        },
        400 | 422 => LlmError::invalid_request(body.to_string()),
        500..=599 => LlmError::ServerError {
            message: body.to_string(),
            status: Some(status),
        },
        _ => LlmError::other(format!("{} answered HTTP {}: {}", provider, status, body)),
    }
}

/// Classify a reqwest failure that produced no response.
pub fn map_transport_error(err: reqwest::Error, provider: &str) -> LlmError {
    let message = format!("{}: {}", provider, err);
    if err.is_timeout() {
        LlmError::Timeout { message }
    } else if err.is_connect() {
        LlmError::ProviderUnavailable { message }
    } else {
        LlmError::NetworkError { message }
    }
}
