//! Error types for pirlog-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed input: wrong payload size, bad IDs or vectors, bad config.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Snapshot mismatch. Recoverable: the caller retries once the replica
    /// has caught up.
    #[error("Stale snapshot: have {have}, want {want}")]
    Stale { have: u64, want: u64 },

    /// A layout referenced an entry the replica never received.
    #[error("Layout references missing entry {id}")]
    MissingEntry { id: u64 },

    /// Signature or AEAD failure. Deliberately carries no detail.
    #[error("Decryption failed")]
    Decryption,

    #[error("Cuckoo placement failed after {displacements} displacements")]
    Capacity { displacements: usize },

    #[error("Handle not initialized: {0}")]
    NotInitialized(&'static str),
}

impl Error {
    /// True for failures the caller should retry after a short wait
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Stale { .. })
    }
}
