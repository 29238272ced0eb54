//! HTTP client for publishing to the coordinator and polling replicas

use std::time::Duration;

use futures::future::try_join_all;
use pirlog_core::bitvec::xor_into;
use pirlog_core::wire::{GetInfoReply, PublishReply, ReadArgs, ReadReply, ReplicaReadArgs};
use pirlog_core::{EntryId, SnapshotId};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{ClientConfig, TrustDomainConfig};
use crate::error::{ClientError, Result};
use crate::handle::Handle;
use crate::topic::Topic;

/// XOR the per-domain answers to one read into a single reply
///
/// The result still carries every domain's pad; the handle strips those.
pub fn combine_replies(replies: &[ReadReply]) -> Result<ReadReply> {
    let (first, rest) = replies
        .split_first()
        .ok_or_else(|| ClientError::InvalidResponse("no replies to combine".to_string()))?;

    let mut data = first.data.clone();
    for reply in std::iter::once(first).chain(rest) {
        if let Some(err) = &reply.err {
            return Err(ClientError::InvalidResponse(format!("cannot combine failed reply: {}", err)));
        }
        if reply.data.len() != data.len() {
            return Err(ClientError::InvalidResponse(format!(
                "reply lengths differ: {} vs {}",
                reply.data.len(),
                data.len()
            )));
        }
    }
    for reply in rest {
        xor_into(&mut data, &reply.data);
    }
    Ok(ReadReply::ok(data))
}

/// Publishes and polls over HTTP
pub struct LogClient {
    config: ClientConfig,
    http: Client,
}

impl LogClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn post<A: Serialize, R: DeserializeOwned>(&self, url: &str, args: &A) -> Result<R> {
        let resp = self.http.post(url).json(args).send().await?;
        if !resp.status().is_success() {
            return Err(ClientError::Server {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp.json().await?)
    }

    async fn get<R: DeserializeOwned>(&self, url: &str) -> Result<R> {
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(ClientError::Server {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp.json().await?)
    }

    /// Publish `message` for the topic's current round
    pub async fn publish(&self, topic: &Topic, message: &[u8]) -> Result<EntryId> {
        let args = topic.generate_publish(&self.config.log, message)?;
        let url = format!("{}/publish", self.config.coordinator_addr);
        let reply: PublishReply = self.post(&url, &args).await?;
        if let Some(reason) = reply.err {
            return Err(ClientError::Rejected {
                addr: self.config.coordinator_addr.clone(),
                reason,
            });
        }

        tracing::debug!(id = reply.id, seqno = topic.seqno(), "Published");
        Ok(reply.id)
    }

    /// Snapshot served by the first trust domain
    pub async fn snapshot_id(&self) -> Result<SnapshotId> {
        let domain = self
            .config
            .trust_domains
            .first()
            .ok_or_else(|| ClientError::InvalidResponse("no trust domains".to_string()))?;
        let info: GetInfoReply = self.get(&format!("{}/info", domain.address)).await?;
        if let Some(reason) = info.err {
            return Err(ClientError::Rejected {
                addr: domain.address.clone(),
                reason,
            });
        }
        Ok(info.snapshot_id)
    }

    /// Read both buckets of the handle's current round from every trust
    /// domain and deliver what decrypts
    ///
    /// Returns the recovered messages. Advancing the handle is left to the
    /// caller.
    pub async fn poll(&self, handle: &mut Handle) -> Result<Vec<Vec<u8>>> {
        let snapshot_id = self.snapshot_id().await?;
        let (first, second) = handle.generate_poll(&self.config.log, self.config.trust_domains.len())?;

        let reads = self
            .config
            .trust_domains
            .iter()
            .enumerate()
            .map(|(i, domain)| {
                let args = ReplicaReadArgs {
                    snapshot_id,
                    requests: vec![first.td[i].clone(), second.td[i].clone()],
                };
                async move { self.read_domain(domain, &args).await }
            });
        let replies = try_join_all(reads).await?;

        let bucket_size = self.config.log.bucket_size();
        let mut combined = combine_replies(&replies)?.data;
        if combined.len() != 2 * bucket_size {
            return Err(ClientError::InvalidResponse(format!(
                "expected {} bytes for two buckets, got {}",
                2 * bucket_size,
                combined.len()
            )));
        }
        let second_bucket = combined.split_off(bucket_size);

        let data_size = self.config.log.data_size as usize;
        let (bucket1, bucket2) = handle.next_buckets(self.config.log.num_buckets);
        let mut messages = Vec::new();
        let mut answers: Vec<(&ReadArgs, Vec<u8>)> = vec![(&first, combined)];
        if bucket2 != bucket1 {
            answers.push((&second, second_bucket));
        }
        for (args, data) in answers {
            if let Some(message) = handle.on_response(args, &ReadReply::ok(data), data_size).await {
                messages.push(message);
            }
        }

        tracing::debug!(
            snapshot_id,
            seqno = handle.seqno,
            recovered = messages.len(),
            "Poll complete"
        );
        Ok(messages)
    }

    async fn read_domain(&self, domain: &TrustDomainConfig, args: &ReplicaReadArgs) -> Result<ReadReply> {
        let url = format!("{}/read", domain.address);
        let attempts = self.config.max_read_attempts;

        for attempt in 1..=attempts {
            let reply: ReadReply = self.post(&url, args).await?;
            if reply.stale {
                tracing::debug!(
                    domain = %domain.name,
                    snapshot_id = args.snapshot_id,
                    attempt,
                    "Replica behind, retrying"
                );
                if attempt < attempts {
                    tokio::time::sleep(self.config.retry_backoff()).await;
                }
                continue;
            }
            if let Some(reason) = reply.err {
                return Err(ClientError::Rejected {
                    addr: domain.address.clone(),
                    reason,
                });
            }
            return Ok(reply);
        }

        Err(ClientError::Exhausted {
            name: domain.name.clone(),
            snapshot_id: args.snapshot_id,
            attempts,
        })
    }
}
