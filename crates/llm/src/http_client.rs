//! HTTP Plumbing
//!
//! Client construction and the request/response steps every HTTP-backed
//! provider shares: send, classify non-2xx answers, decode a JSON body.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::config::ProviderConfig;
use crate::error::{LlmError, LlmResult};
use crate::provider::{map_transport_error, parse_http_error};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client honoring the entry's request timeout.
pub fn build_http_client(config: &ProviderConfig) -> LlmResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| LlmError::other(format!("failed to build HTTP client: {}", e)))
}

/// Send `request`; a non-2xx answer is read and classified.
pub(crate) async fn send_checked(
    request: reqwest::RequestBuilder,
    provider: &str,
) -> LlmResult<reqwest::Response> {
    let response = request
        .send()
        .await
        .map_err(|e| map_transport_error(e, provider))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(provider, status = status.as_u16(), "provider refused request");
    Err(parse_http_error(status.as_u16(), &body, provider))
}

pub(crate) async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
    provider: &str,
) -> LlmResult<T> {
    let text = response
        .text()
        .await
        .map_err(|e| map_transport_error(e, provider))?;
    decode_body(&text, provider)
}

pub(crate) fn decode_body<T: DeserializeOwned>(text: &str, provider: &str) -> LlmResult<T> {
    serde_json::from_str(text)
        .map_err(|e| LlmError::parse(format!("unexpected {} response body: {}", provider, e)))
}
