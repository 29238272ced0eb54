//! Server error types
//!
//! Protocol-level failures (bad sizes, stale snapshots) are reported inside
//! reply bodies. `ServerError` covers everything else and renders as a
//! structured `{error, code}` body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pirlog_pir::ShardError;
use serde::Serialize;
use thiserror::Error;

/// Structured error response for API clients
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Core(#[from] pirlog_core::Error),

    #[error("Shard error: {0}")]
    Shard(#[from] ShardError),

    #[error("Request to {addr} failed: {reason}")]
    Remote { addr: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Get the error code for structured responses
    fn code(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "INVALID_REQUEST",
            ServerError::Core(pirlog_core::Error::Stale { .. }) => "STALE_SNAPSHOT",
            ServerError::Core(pirlog_core::Error::Validation(_)) => "VALIDATION_ERROR",
            ServerError::Core(pirlog_core::Error::MissingEntry { .. }) => "MISSING_ENTRY",
            ServerError::Core(_) => "CORE_ERROR",
            ServerError::Shard(_) => "SHARD_ERROR",
            ServerError::Remote { .. } => "REMOTE_ERROR",
            ServerError::Transport(_) => "TRANSPORT_ERROR",
            ServerError::Io(_) => "IO_ERROR",
            ServerError::Json(_) => "JSON_ERROR",
            ServerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the HTTP status code for this error
    fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Core(pirlog_core::Error::Validation(_)) => StatusCode::BAD_REQUEST,
            ServerError::Core(pirlog_core::Error::Stale { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Shard(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Remote { .. } => StatusCode::BAD_GATEWAY,
            ServerError::Transport(_) => StatusCode::BAD_GATEWAY,
            ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Json(_) => StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
