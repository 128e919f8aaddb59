//! Engine Errors
//!
//! `AppError` is what the coordinator, the workspace store and the HTTP
//! handlers return. The API layer renders it as `{"error", "code"}` with a
//! status chosen by `status_code`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pixlie_core::CoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Request or objective text the engine refuses to act on
    #[error("invalid request: {0}")]
    Validation(String),

    /// Unknown objective, workspace or step
    #[error("not found: {0}")]
    NotFound(String),

    /// The objective's lifecycle does not allow the operation
    #[error("conflict: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// Every configured provider failed or none could be built
    #[error("llm provider failure: {0}")]
    Provider(String),

    /// A workspace file could not be opened or written
    #[error("workspace store: {0}")]
    Persistence(String),

    #[error("database: {0}")]
    Database(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Engine settings file is unreadable
    #[error("config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::Serialization(_)
            | AppError::Core(CoreError::Validation(_)) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) | AppError::Core(CoreError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            AppError::InvalidState(_) | AppError::Core(CoreError::InvalidState(_)) => {
                StatusCode::CONFLICT
            }
            AppError::Provider(_) => StatusCode::BAD_GATEWAY,
            AppError::Core(CoreError::Internal(_))
            | AppError::Persistence(_)
            | AppError::Database(_)
            | AppError::Sqlite(_)
            | AppError::Config(_)
            | AppError::Io(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable code clients can branch on.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::Serialization(_) => "invalid_request",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidState(_) => "conflict",
            AppError::Core(CoreError::Validation(_)) => "invalid_request",
            AppError::Core(CoreError::NotFound(_)) => "not_found",
            AppError::Core(CoreError::InvalidState(_)) => "conflict",
            AppError::Provider(_) => "provider_failure",
            AppError::Persistence(_) => "persistence_failure",
            AppError::Database(_) | AppError::Sqlite(_) => "database_failure",
            AppError::Config(_) => "config_failure",
            AppError::Core(CoreError::Internal(_)) | AppError::Io(_) | AppError::Internal(_) => {
                "internal"
            }
        }
    }
}

impl From<r2d2::Error> for AppError {
    fn from(err: r2d2::Error) -> Self {
        AppError::database(format!("connection pool: {}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));
        (status, body).into_response()
    }
}
