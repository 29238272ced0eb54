//! Publisher side of a topic

use ed25519_dalek::SigningKey;
use pirlog_core::drbg::Seed;
use pirlog_core::wire::PublishArgs;
use pirlog_core::{LogConfig, Result};
use rand::RngCore;

use crate::crypto::{self, KEY_LENGTH};
use crate::handle::{Handle, SharedSecret, SigningPublicKey};

/// Keys for writing one topic, plus the handle subscribers follow it with
pub struct Topic {
    handle: Handle,
    secret: [u8; KEY_LENGTH],
    signing_key: SigningKey,
}

impl Topic {
    /// Fresh seeds, box secret and signing key from the OS RNG
    pub fn new() -> Self {
        let mut rng = rand::rngs::OsRng;
        let mut secret = [0u8; KEY_LENGTH];
        rng.fill_bytes(&mut secret);
        let mut signing = [0u8; KEY_LENGTH];
        rng.fill_bytes(&mut signing);
        let signing_key = SigningKey::from_bytes(&signing);

        let handle = Handle::new(Seed::random(), Seed::random()).with_keys(
            SharedSecret(secret),
            SigningPublicKey(signing_key.verifying_key().to_bytes()),
        );

        Self {
            handle,
            secret,
            signing_key,
        }
    }

    /// Subscriber handle positioned at the topic's current round
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub fn seqno(&self) -> u64 {
        self.handle.seqno
    }

    /// Move to the next round
    pub fn advance(&mut self) {
        self.handle.advance();
    }

    /// Seal `message` for the current round and target its bucket pair
    ///
    /// The result is exactly `data_size` bytes.
    pub fn generate_publish(&self, config: &LogConfig, message: &[u8]) -> Result<PublishArgs> {
        let framed = crypto::frame(message, config.data_size as usize)?;
        let data = crypto::seal(&self.secret, &self.signing_key, &self.handle.nonce(), &framed)?;
        let (bucket1, bucket2) = self.handle.next_buckets(config.num_buckets);
        Ok(PublishArgs {
            bucket1,
            bucket2,
            data,
        })
    }
}

impl Default for Topic {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("seqno", &self.handle.seqno)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use pirlog_core::Error;

    use super::*;

    #[test]
    fn test_publish_shape() {
        let config = LogConfig::new(32, 4, 200);
        let topic = Topic::new();
        let args = topic.generate_publish(&config, b"hi").unwrap();

        assert_eq!(args.data.len(), 200);
        assert!(args.bucket1 < 32 && args.bucket2 < 32);
        assert_eq!((args.bucket1, args.bucket2), topic.handle().next_buckets(32));
    }

    #[test]
    fn test_publish_rejects_long_message() {
        let config = LogConfig::new(32, 4, 200);
        let topic = Topic::new();
        let err = topic.generate_publish(&config, &[0u8; 200]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_rounds_change_targets() {
        let config = LogConfig::new(1 << 16, 1, 128);
        let mut topic = Topic::new();
        let first = topic.generate_publish(&config, b"a").unwrap();
        topic.advance();
        let second = topic.generate_publish(&config, b"a").unwrap();

        assert_eq!(topic.seqno(), 1);
        assert_ne!(first.data, second.data);
        assert_ne!(
            (first.bucket1, first.bucket2),
            (second.bucket1, second.bucket2)
        );
    }

    #[test]
    fn test_handle_opens_topic_messages() {
        let config = LogConfig::new(32, 1, 128);
        let topic = Topic::new();
        let args = topic.generate_publish(&config, b"x").unwrap();

        let handle = topic.handle();
        let opened = handle.decrypt(&args.data, &handle.nonce()).unwrap();
        assert_eq!(crypto::unframe(&opened), Some(&b"x"[..]));

        let stranger = Topic::new().handle();
        assert!(matches!(
            stranger.decrypt(&args.data, &stranger.nonce()),
            Err(Error::Decryption)
        ));
    }
}
