//! Client configuration

use std::path::Path;
use std::time::Duration;

use pirlog_core::{Error, LogConfig};
use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryConfig;

/// One independently operated replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustDomainConfig {
    pub name: String,
    /// Base URL of the replica, e.g. `http://127.0.0.1:9001`
    pub address: String,
}

impl TrustDomainConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into().trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub log: LogConfig,
    /// Base URL of the layout coordinator
    pub coordinator_addr: String,
    pub trust_domains: Vec<TrustDomainConfig>,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Attempts per domain while a replica lags the requested snapshot
    #[serde(default = "default_max_read_attempts")]
    pub max_read_attempts: usize,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_max_read_attempts() -> usize {
    5
}

fn default_retry_backoff_ms() -> u64 {
    200
}

impl ClientConfig {
    pub fn new(log: LogConfig, coordinator_addr: impl Into<String>, trust_domains: Vec<TrustDomainConfig>) -> Self {
        Self {
            log,
            coordinator_addr: coordinator_addr.into().trim_end_matches('/').to_string(),
            trust_domains,
            delivery: DeliveryConfig::default(),
            max_read_attempts: default_max_read_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }

    pub fn with_delivery(mut self, delivery: DeliveryConfig) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// A client polls whole buckets, so every trust domain must serve the
    /// full table
    pub fn validate(&self) -> pirlog_core::Result<()> {
        self.log.validate()?;
        if self.trust_domains.is_empty() {
            return Err(Error::Validation("no trust domains configured".to_string()));
        }
        if self.log.num_groups() != 1 {
            return Err(Error::Validation(format!(
                "each trust domain must serve all {} buckets, config splits them into {} groups",
                self.log.num_buckets,
                self.log.num_groups()
            )));
        }
        if self.max_read_attempts == 0 {
            return Err(Error::Validation("max_read_attempts must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> pirlog_core::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> pirlog_core::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
