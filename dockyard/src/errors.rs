//! Error types for the Dockyard control plane

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Main error type for the control plane
#[derive(Error, Debug)]
pub enum DockyardError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Container engine error: {0}")]
    EngineError(String),

    #[error("Source sync error: {0}")]
    SourceError(String),

    #[error("All ports between {first} and {last} are allocated")]
    PortsExhausted { first: u16, last: u16 },

    #[error("Operation already in progress: {0}")]
    Conflict(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Terminal error: {0}")]
    TerminalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DockyardError {
    /// HTTP status the error maps to when it escapes a handler
    pub fn status_code(&self) -> StatusCode {
        match self {
            DockyardError::ValidationError(_) => StatusCode::BAD_REQUEST,
            DockyardError::AuthError(_) => StatusCode::UNAUTHORIZED,
            DockyardError::NotFound(_) => StatusCode::NOT_FOUND,
            DockyardError::Conflict(_) => StatusCode::CONFLICT,
            DockyardError::PortsExhausted { .. } => StatusCode::INSUFFICIENT_STORAGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for DockyardError {
    fn from(err: anyhow::Error) -> Self {
        DockyardError::Internal(err.to_string())
    }
}

impl IntoResponse for DockyardError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
