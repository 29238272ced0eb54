//! pirlog-client: topics, subscriber handles and the HTTP client
//!
//! A [`Topic`] seals messages for successive rounds and targets a bucket
//! pair derived from its seeds. A [`Handle`] follows the same sequence,
//! splits each bucket read into masked shares, one per trust domain, and
//! trial-decrypts the combined answer.
//!
//! ```no_run
//! # async fn demo(config: pirlog_client::ClientConfig) -> pirlog_client::Result<()> {
//! use pirlog_client::{DeliveryConfig, LogClient, Topic};
//!
//! let client = LogClient::new(config)?;
//! let mut topic = Topic::new();
//! let mut handle = topic.handle();
//! let mut updates = handle.subscribe(&DeliveryConfig::default());
//!
//! client.publish(&topic, b"hello").await?;
//! topic.advance();
//! // once a snapshot containing the message is live:
//! tokio::spawn(async move { while let Some(msg) = updates.recv().await { println!("{:?}", msg) } });
//! client.poll(&mut handle).await?;
//! handle.advance();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod crypto;
pub mod delivery;
pub mod error;
pub mod handle;
pub mod topic;

pub use client::{combine_replies, LogClient};
pub use config::{ClientConfig, TrustDomainConfig};
pub use delivery::{DeliveryConfig, DeliveryPolicy, Subscription};
pub use error::{ClientError, Result};
pub use handle::{Handle, SharedSecret, SigningPublicKey};
pub use topic::Topic;
