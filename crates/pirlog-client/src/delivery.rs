//! Hand-off of recovered messages from a handle to its consumer
//!
//! `Block` is a bounded mpsc queue: delivery waits for room, so a stalled
//! consumer stalls response processing for its own handle. `DropOldest` is a
//! broadcast ring of the same capacity: delivery never waits and a slow
//! consumer skips the oldest undelivered messages.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

/// What happens when the consumer falls behind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    #[default]
    Block,
    DropOldest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub policy: DeliveryPolicy,
    /// Undelivered messages held before the policy applies
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    1
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            policy: DeliveryPolicy::default(),
            capacity: default_capacity(),
        }
    }
}

impl DeliveryConfig {
    pub fn drop_oldest(capacity: usize) -> Self {
        Self {
            policy: DeliveryPolicy::DropOldest,
            capacity,
        }
    }
}

/// Producer half, held by a handle
#[derive(Debug, Clone)]
pub(crate) enum DeliverySender {
    Block(mpsc::Sender<Vec<u8>>),
    DropOldest(broadcast::Sender<Vec<u8>>),
}

impl DeliverySender {
    /// Hand `message` to the consumer. Returns false if nobody is listening.
    pub(crate) async fn deliver(&self, message: Vec<u8>) -> bool {
        match self {
            DeliverySender::Block(tx) => tx.send(message).await.is_ok(),
            DeliverySender::DropOldest(tx) => tx.send(message).is_ok(),
        }
    }
}

#[derive(Debug)]
enum Receiver {
    Block(mpsc::Receiver<Vec<u8>>),
    DropOldest(broadcast::Receiver<Vec<u8>>),
}

/// Consumer half: the stream of messages recovered for one handle
#[derive(Debug)]
pub struct Subscription {
    rx: Receiver,
}

impl Subscription {
    /// Next message, or `None` once the handle is gone
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        match &mut self.rx {
            Receiver::Block(rx) => rx.recv().await,
            Receiver::DropOldest(rx) => loop {
                match rx.recv().await {
                    Ok(message) => return Some(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Subscriber lagged, oldest messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }

    /// Next message if one is already queued
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        match &mut self.rx {
            Receiver::Block(rx) => rx.try_recv().ok(),
            Receiver::DropOldest(rx) => loop {
                match rx.try_recv() {
                    Ok(message) => return Some(message),
                    Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Subscriber lagged, oldest messages dropped");
                    }
                    Err(_) => return None,
                }
            },
        }
    }
}

pub(crate) fn channel(config: &DeliveryConfig) -> (DeliverySender, Subscription) {
    let capacity = config.capacity.max(1);
    match config.policy {
        DeliveryPolicy::Block => {
            let (tx, rx) = mpsc::channel(capacity);
            (
                DeliverySender::Block(tx),
                Subscription {
                    rx: Receiver::Block(rx),
                },
            )
        }
        DeliveryPolicy::DropOldest => {
            let (tx, rx) = broadcast::channel(capacity);
            (
                DeliverySender::DropOldest(tx),
                Subscription {
                    rx: Receiver::DropOldest(rx),
                },
            )
        }
    }
}
