//! Shard error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardError {
    #[error("Bucket size must be non-zero")]
    ZeroBucketSize,

    #[error("Shard data of {len} bytes is not a whole number of {bucket_size}-byte buckets")]
    UnalignedData { len: usize, bucket_size: usize },

    #[error("Invalid request batch: {0}")]
    InvalidRequest(String),

    #[error("Shard has been freed")]
    Freed,

    #[error("Unknown backing: {0}")]
    UnknownBacking(String),
}
