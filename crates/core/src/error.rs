//! Core Errors
//!
//! The failures the ledger and the tool contract can report. Each variant
//! corresponds to one class of the engine's error taxonomy, so the HTTP layer
//! can map a `CoreError` to a status code without inspecting messages:
//!
//! - `Validation` - the caller supplied bad input
//! - `NotFound` - an id or name does not resolve
//! - `InvalidState` - the operation is illegal in the current lifecycle state
//! - `Internal` - anything else

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the caller, not the engine, is at fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, CoreError::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            CoreError::invalid_state("step 3 is already completed").to_string(),
            "invalid state: step 3 is already completed"
        );
        assert_eq!(
            CoreError::not_found("tool query_sql").to_string(),
            "not found: tool query_sql"
        );
    }

    #[test]
    fn test_client_errors() {
        assert!(CoreError::validation("missing field `query`").is_client_error());
        assert!(CoreError::not_found("x").is_client_error());
        assert!(CoreError::invalid_state("x").is_client_error());
        assert!(!CoreError::internal("disk").is_client_error());
    }
}
