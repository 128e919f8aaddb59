//! Tool Errors
//!
//! Every failure a tool call can produce. The sandbox turns these into the
//! `error` side of a `ToolExecution`; none of them stop the analysis loop.

use pixlie_core::CoreError;
use thiserror::Error;

/// Error raised while validating or running a tool.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// Parameters do not match the tool's schema or its own checks
    #[error("Validation error: {0}")]
    Validation(String),

    /// No tool registered under that name
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// The handler ran and failed
    #[error("Execution error: {0}")]
    Execution(String),

    /// The handler exceeded its time budget
    #[error("Tool timed out after {0} ms")]
    Timeout(u64),

    /// The handler task panicked
    #[error("Tool panicked: {0}")]
    Panicked(String),
}

/// Result type alias for tool operations
pub type ToolResultOf<T> = Result<T, ToolError>;

impl ToolError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Errors the planner caused with its input, as opposed to runtime faults.
    pub fn is_validation(&self) -> bool {
        matches!(self, ToolError::Validation(_) | ToolError::NotFound(_))
    }
}

impl From<CoreError> for ToolError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => ToolError::Validation(msg),
            CoreError::NotFound(msg) => ToolError::NotFound(msg),
            CoreError::Internal(msg) => ToolError::Execution(msg),
            other @ CoreError::InvalidState(_) => ToolError::Execution(other.to_string()),
        }
    }
}

impl From<ToolError> for CoreError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Validation(msg) => CoreError::Validation(msg),
            ToolError::NotFound(msg) => CoreError::NotFound(msg),
            ToolError::Execution(msg) => CoreError::Internal(msg),
            other => CoreError::Internal(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for ToolError {
    fn from(err: rusqlite::Error) -> Self {
        ToolError::Execution(format!("SQLite error: {}", err))
    }
}

impl From<r2d2::Error> for ToolError {
    fn from(err: r2d2::Error) -> Self {
        ToolError::Execution(format!("Connection pool error: {}", err))
    }
}
