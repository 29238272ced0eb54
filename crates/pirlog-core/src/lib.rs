//! pirlog-core: shared types for the oblivious publish/subscribe log
//!
//! Writers publish fixed-size, encrypted messages into a cuckoo table whose
//! buckets are frozen into versioned layouts and served by replicas. Readers
//! fetch whole buckets with multi-server PIR so no single replica learns
//! which bucket, and therefore which topic, a reader follows.
//!
//! # Privacy & Threat Model
//!
//! - **Server model**: several trust domains, at least one honest;
//!   each is honest-but-curious
//! - **Security goal**: a reader's target bucket is hidden from any proper
//!   subset of trust domains
//! - **Non-goals**: network anonymity, availability
//!
//! | Information | Replica Knowledge |
//! |-------------|-------------------|
//! | Message contents | NO - encrypted and signed per topic |
//! | Which bucket a reader polls | NO - request vectors look uniform |
//! | Which buckets a writer targets | YES - writes are public |
//! | Snapshot a reader asked for | YES |
//!
//! This crate holds the pieces every role shares: geometry config, the error
//! taxonomy, wire structures, the DRBG, bit-vector helpers, the cuckoo table
//! and layouts built from it.

mod config;
mod error;

pub mod bitvec;
pub mod cuckoo;
pub mod drbg;
pub mod layout;
pub mod wire;

pub use config::{LogConfig, PROTOCOL_VERSION};
pub use cuckoo::{CuckooError, CuckooTable, Entry, Insertion};
pub use drbg::{Drbg, Seed, SEED_LENGTH};
pub use error::Error;
pub use layout::{Layout, SplitError};

pub type Result<T> = std::result::Result<T, Error>;

/// Identifier of a published log entry
pub type EntryId = u64;

/// Identifier of a frozen layout
pub type SnapshotId = u64;

/// Constants for the log geometry
pub mod constants {
    /// Layout slot value meaning "no entry here"
    pub const EMPTY_SLOT_ID: u64 = 0;

    /// First entry ID handed out by a coordinator
    pub const FIRST_ENTRY_ID: u64 = 1;

    /// Default bucket count
    pub const DEFAULT_NUM_BUCKETS: u64 = 1024;

    /// Default slots per bucket
    pub const DEFAULT_BUCKET_DEPTH: u64 = 4;

    /// Default message size (framing + ciphertext + signature)
    pub const DEFAULT_DATA_SIZE: u64 = 1024;
}
