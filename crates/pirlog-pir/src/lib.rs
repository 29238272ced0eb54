//! pirlog-pir: oblivious batch reads over bucket data
//!
//! A [`Shard`] owns a contiguous buffer of `num_buckets * bucket_size` bytes
//! and answers batches of bucket-selection bit vectors. For each request the
//! answer is the XOR of every selected bucket. Backends must touch every
//! bucket for every request regardless of which bits are set.

mod cpu;
mod error;

#[cfg(test)]
mod testing;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use cpu::CpuShard;
pub use error::ShardError;

pub type Result<T> = std::result::Result<T, ShardError>;

/// Read-only bucket store answering oblivious batch reads
///
/// A shard is not reentrant: `read` takes `&mut self`, so callers that share
/// one must serialize access.
pub trait Shard: Send {
    /// Answer a batch of requests laid out back to back, `req_stride` bytes
    /// apart. Returns one `bucket_size` block per request.
    fn read(&mut self, requests: &[u8], req_stride: usize) -> Result<Vec<u8>>;

    fn num_buckets(&self) -> usize;

    fn bucket_size(&self) -> usize;

    /// The raw bucket buffer; empty once freed
    fn data(&self) -> &[u8];

    /// Release the buffer. Later reads fail with [`ShardError::Freed`].
    fn free(&mut self) -> Result<()>;
}

/// Which backend materializes shards
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backing {
    #[default]
    Cpu,
}

impl fmt::Display for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backing::Cpu => write!(f, "cpu"),
        }
    }
}

impl FromStr for Backing {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Backing::Cpu),
            other => Err(ShardError::UnknownBacking(other.to_string())),
        }
    }
}

/// Build a shard over `data` on the chosen backend
pub fn new_shard(backing: Backing, bucket_size: usize, data: Vec<u8>) -> Result<Box<dyn Shard>> {
    match backing {
        Backing::Cpu => Ok(Box::new(CpuShard::new(bucket_size, data)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backing_parse() {
        assert_eq!("cpu".parse::<Backing>().unwrap(), Backing::Cpu);
        assert_eq!("CPU".parse::<Backing>().unwrap(), Backing::Cpu);
        assert!(matches!(
            "gpu".parse::<Backing>(),
            Err(ShardError::UnknownBacking(_))
        ));
        assert_eq!(Backing::Cpu.to_string(), "cpu");
    }

    #[test]
    fn test_new_shard_cpu() {
        let shard = new_shard(Backing::Cpu, 16, testing::generate_data(16 * 8)).unwrap();
        assert_eq!(shard.num_buckets(), 8);
        assert_eq!(shard.bucket_size(), 16);
    }
}
