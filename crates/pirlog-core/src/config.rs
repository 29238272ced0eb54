//! Log geometry configuration shared by coordinator, replicas and clients

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Protocol version constant
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Geometry of the published log
///
/// Buckets are split into groups, one group per replica, and each group into
/// `num_shards_per_group` shards of `num_buckets_per_shard` buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Total number of buckets in the cuckoo table
    pub num_buckets: u64,
    /// Slots per bucket
    pub bucket_depth: u64,
    /// Size of every stored message in bytes
    pub data_size: u64,
    /// Shards held by one replica
    pub num_shards_per_group: u64,
    /// Buckets in one shard
    pub num_buckets_per_shard: u64,
    /// Maximum live entries retained by the coordinator
    #[serde(default = "default_window_size")]
    pub window_size: u64,
    /// Override for the cuckoo displacement bound
    #[serde(default)]
    pub max_displacements: Option<usize>,
    /// Protocol version
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_window_size() -> u64 {
    u64::MAX
}

fn default_version() -> String {
    PROTOCOL_VERSION.to_string()
}

impl LogConfig {
    /// Single-group geometry: one replica holds every bucket in one shard
    pub fn new(num_buckets: u64, bucket_depth: u64, data_size: u64) -> Self {
        Self {
            num_buckets,
            bucket_depth,
            data_size,
            num_shards_per_group: 1,
            num_buckets_per_shard: num_buckets,
            window_size: default_window_size(),
            max_displacements: None,
            version: default_version(),
        }
    }

    /// Split each replica group into `shards` shards of `buckets_per_shard`
    pub fn with_shards(mut self, shards: u64, buckets_per_shard: u64) -> Self {
        self.num_shards_per_group = shards;
        self.num_buckets_per_shard = buckets_per_shard;
        self
    }

    /// Bound the number of live entries
    pub fn with_window(mut self, window_size: u64) -> Self {
        self.window_size = window_size;
        self
    }

    /// Bytes in one bucket
    pub fn bucket_size(&self) -> usize {
        (self.bucket_depth * self.data_size) as usize
    }

    /// Buckets served by one replica group
    pub fn group_size(&self) -> u64 {
        self.num_shards_per_group * self.num_buckets_per_shard
    }

    /// Number of replica groups the table is split into
    pub fn num_groups(&self) -> u64 {
        self.num_buckets / self.group_size()
    }

    /// Slots in a full layout
    pub fn layout_len(&self) -> usize {
        (self.num_buckets * self.bucket_depth) as usize
    }

    /// Byte length of a request vector addressing every bucket
    pub fn request_vector_len(&self) -> usize {
        crate::bitvec::request_vector_len(self.num_buckets as usize)
    }

    /// Displacement bound for cuckoo insertion: 8 * ceil(log2(num_buckets))
    pub fn displacement_bound(&self) -> usize {
        self.max_displacements.unwrap_or_else(|| {
            let log2 = self.num_buckets.max(2).next_power_of_two().trailing_zeros() as usize;
            8 * log2
        })
    }

    /// Check every relation the layout split depends on
    pub fn validate(&self) -> crate::Result<()> {
        let nonzero = [
            ("num_buckets", self.num_buckets),
            ("bucket_depth", self.bucket_depth),
            ("data_size", self.data_size),
            ("num_shards_per_group", self.num_shards_per_group),
            ("num_buckets_per_shard", self.num_buckets_per_shard),
            ("window_size", self.window_size),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(Error::Validation(format!("{} must be non-zero", field)));
            }
        }
        if self.num_buckets % self.group_size() != 0 {
            return Err(Error::Validation(format!(
                "num_buckets ({}) is not a multiple of the group size ({})",
                self.num_buckets,
                self.group_size()
            )));
        }
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new(
            crate::constants::DEFAULT_NUM_BUCKETS,
            crate::constants::DEFAULT_BUCKET_DEPTH,
            crate::constants::DEFAULT_DATA_SIZE,
        )
    }
}
