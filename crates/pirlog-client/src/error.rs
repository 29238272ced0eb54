//! Error types for pirlog-client

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] pirlog_core::Error),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// An expected failure reported in a reply's `err` field
    #[error("{addr} rejected request: {reason}")]
    Rejected { addr: String, reason: String },

    #[error("Trust domain {name} still behind snapshot {snapshot_id} after {attempts} attempts")]
    Exhausted {
        name: String,
        snapshot_id: u64,
        attempts: usize,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
