//! Replica and coordinator configuration

use std::net::SocketAddr;
use std::path::Path;

use pirlog_core::LogConfig;
use pirlog_pir::Backing;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};

/// Configuration of one replica process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Name reported by `GetInfo`
    pub name: String,
    /// Listen address
    pub addr: SocketAddr,
    /// Replica group this process serves
    #[serde(default)]
    pub group: u64,
    /// Shard backend
    #[serde(default)]
    pub backing: Backing,
    /// Coordinator base URL used when a stale read triggers a refresh
    pub layout_addr: String,
    /// Log geometry, shared with the coordinator
    pub log: LogConfig,
}

impl ReplicaConfig {
    pub fn new(name: impl Into<String>, layout_addr: impl Into<String>, log: LogConfig) -> Self {
        Self {
            name: name.into(),
            addr: ([127, 0, 0, 1], 3100).into(),
            group: 0,
            backing: Backing::default(),
            layout_addr: layout_addr.into(),
            log,
        }
    }

    pub fn with_group(mut self, group: u64) -> Self {
        self.group = group;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.log.validate()?;
        if self.group >= self.log.num_groups() {
            return Err(ServerError::InvalidRequest(format!(
                "group {} out of range ({} groups)",
                self.group,
                self.log.num_groups()
            )));
        }
        Ok(())
    }

    /// Number of slices the coordinator cuts a layout into for replicas
    pub fn num_split(&self) -> u64 {
        self.log.num_groups()
    }

    /// First bucket served by this replica
    pub fn first_bucket(&self) -> usize {
        (self.group * self.log.group_size()) as usize
    }

    /// Layout slots held by one shard
    pub fn items_per_shard(&self) -> usize {
        (self.log.num_buckets_per_shard * self.log.bucket_depth) as usize
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}

/// Configuration of the layout coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Listen address
    pub addr: SocketAddr,
    /// Base URL replicas fetch layouts from; defaults to `http://{addr}`
    #[serde(default)]
    pub public_url: Option<String>,
    /// Replica base URLs receiving writes and notifications
    #[serde(default)]
    pub replicas: Vec<String>,
    /// Snapshot build period
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,
    /// Fixed seed for cuckoo victim selection
    #[serde(default)]
    pub eviction_seed: Option<u64>,
    pub log: LogConfig,
}

fn default_snapshot_interval_ms() -> u64 {
    1000
}

impl CoordinatorConfig {
    pub fn new(log: LogConfig) -> Self {
        Self {
            addr: ([127, 0, 0, 1], 3000).into(),
            public_url: None,
            replicas: Vec::new(),
            snapshot_interval_ms: default_snapshot_interval_ms(),
            eviction_seed: None,
            log,
        }
    }

    /// URL sent to replicas in `NotifyArgs`
    pub fn layout_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.addr))
    }

    pub fn snapshot_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.log.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}
