//! Provider Errors
//!
//! Every provider, planner and the chain itself report failures as
//! [`LlmError`]. The fallback chain turns these into a `FailureReason` to
//! decide between retrying, moving on and giving up.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("credentials rejected: {message}")]
    AuthenticationFailed { message: String },

    #[error("rate limited: {message}")]
    RateLimited { message: String },

    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    /// The provider refused the request as malformed.
    #[error("request rejected: {message}")]
    InvalidRequest { message: String },

    #[error("server error{}: {message}", http_status(.status))]
    ServerError { message: String, status: Option<u16> },

    #[error("network error: {message}")]
    NetworkError { message: String },

    #[error("timed out: {message}")]
    Timeout { message: String },

    /// The response arrived but could not be interpreted.
    #[error("unreadable response: {message}")]
    ParseError { message: String },

    /// Nothing is listening, or no provider is configured.
    #[error("provider unavailable: {message}")]
    ProviderUnavailable { message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("{message}")]
    Other { message: String },
}

fn http_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl LlmError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }
}

pub type LlmResult<T> = Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = LlmError::ServerError {
            message: "overloaded".into(),
            status: Some(529),
        };
        assert_eq!(err.to_string(), "server error (HTTP 529): overloaded");

        let err = LlmError::ServerError {
            message: "stream broke".into(),
            status: None,
        };
        assert_eq!(err.to_string(), "server error: stream broke");

        assert_eq!(LlmError::other("no script").to_string(), "no script");
        assert_eq!(LlmError::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_constructors() {
        assert!(matches!(LlmError::parse("x"), LlmError::ParseError { .. }));
        assert!(matches!(
            LlmError::invalid_request("x"),
            LlmError::InvalidRequest { .. }
        ));
    }
}
