//! Subscriber handle: bucket derivation, masked polls and message recovery

use std::hash::Hasher;

use pirlog_core::bitvec::{set_bit, xor_into};
use pirlog_core::drbg::{self, Drbg, Seed, SEED_LENGTH};
use pirlog_core::wire::{PirArgs, ReadArgs, ReadReply};
use pirlog_core::{Error, LogConfig, Result};
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher24;

use crate::crypto::{self, KEY_LENGTH};
use crate::delivery::{self, DeliveryConfig, DeliverySender, Subscription};

/// Bytes hashed per sequence number when deriving a bucket
const BUCKET_INPUT_LENGTH: usize = 24;

/// Box secret shared by a topic's publisher and subscribers
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedSecret(#[serde(with = "pirlog_core::wire::hex_array")] pub [u8; KEY_LENGTH]);

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// Ed25519 key that verifies a topic's messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningPublicKey(#[serde(with = "pirlog_core::wire::hex_array")] pub [u8; KEY_LENGTH]);

/// Everything a subscriber needs to follow one topic
///
/// Serializes without its request DRBG or delivery queue; a deserialized
/// handle gets a fresh DRBG and no subscriber until [`Handle::subscribe`].
#[derive(Serialize, Deserialize)]
pub struct Handle {
    pub seed1: Seed,
    pub seed2: Seed,
    #[serde(default)]
    pub shared_secret: Option<SharedSecret>,
    #[serde(default)]
    pub signing_public_key: Option<SigningPublicKey>,
    /// Current round; advanced by the consumer
    pub seqno: u64,
    #[serde(skip, default = "fresh_drbg")]
    drbg: Drbg,
    #[serde(skip)]
    updates: Option<DeliverySender>,
}

fn fresh_drbg() -> Drbg {
    Drbg::new(None)
}

impl Clone for Handle {
    /// The clone shares keys and position but not the DRBG or subscriber
    fn clone(&self) -> Self {
        Self {
            seed1: self.seed1.clone(),
            seed2: self.seed2.clone(),
            shared_secret: self.shared_secret.clone(),
            signing_public_key: self.signing_public_key.clone(),
            seqno: self.seqno,
            drbg: fresh_drbg(),
            updates: None,
        }
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("seqno", &self.seqno)
            .field("initialized", &self.is_initialized())
            .field("subscribed", &self.updates.is_some())
            .finish()
    }
}

fn put_uvarint(buf: &mut [u8], mut value: u64) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        buf[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
    i + 1
}

fn bucket_for(seed: &Seed, seqno: u64, num_buckets: u64) -> u64 {
    let mut input = [0u8; BUCKET_INPUT_LENGTH];
    put_uvarint(&mut input, seqno);
    let (k0, k1) = seed.key_u128();
    let mut hasher = SipHasher24::new_with_keys(k0, k1);
    hasher.write(&input);
    hasher.finish() % num_buckets
}

impl Handle {
    /// Handle without keys; polls fail until [`Handle::with_keys`]
    pub fn new(seed1: Seed, seed2: Seed) -> Self {
        Self {
            seed1,
            seed2,
            shared_secret: None,
            signing_public_key: None,
            seqno: 0,
            drbg: fresh_drbg(),
            updates: None,
        }
    }

    pub fn with_keys(mut self, shared_secret: SharedSecret, signing_public_key: SigningPublicKey) -> Self {
        self.shared_secret = Some(shared_secret);
        self.signing_public_key = Some(signing_public_key);
        self
    }

    /// Pin the request DRBG (tests)
    pub fn with_drbg_seed(mut self, seed: Seed) -> Self {
        self.drbg = Drbg::new(Some(seed));
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.shared_secret.is_some() && self.signing_public_key.is_some()
    }

    /// Start a new consumer. Replaces any previous subscription.
    pub fn subscribe(&mut self, config: &DeliveryConfig) -> Subscription {
        let (tx, subscription) = delivery::channel(config);
        self.updates = Some(tx);
        subscription
    }

    /// Move to the next round
    pub fn advance(&mut self) {
        self.seqno += 1;
    }

    /// Bucket pair for the current round
    pub fn next_buckets(&self, num_buckets: u64) -> (u64, u64) {
        self.buckets_at(self.seqno, num_buckets)
    }

    /// Bucket pair for round `seqno`. Seed1 picks the first, Seed2 the second.
    pub fn buckets_at(&self, seqno: u64, num_buckets: u64) -> (u64, u64) {
        (
            bucket_for(&self.seed1, seqno, num_buckets),
            bucket_for(&self.seed2, seqno, num_buckets),
        )
    }

    pub fn nonce(&self) -> [u8; crypto::NONCE_LENGTH] {
        crypto::nonce(self.seqno)
    }

    /// Build the masked reads for both buckets of the current round
    ///
    /// Domains `1..n` get pseudorandom vectors; domain 0 gets the one-hot
    /// target XOR all of them, so only the XOR of every share selects a
    /// bucket.
    pub fn generate_poll(
        &mut self,
        config: &LogConfig,
        num_trust_domains: usize,
    ) -> Result<(ReadArgs, ReadArgs)> {
        if self.shared_secret.is_none() {
            return Err(Error::NotInitialized("shared secret"));
        }
        if self.signing_public_key.is_none() {
            return Err(Error::NotInitialized("signing public key"));
        }
        if num_trust_domains == 0 {
            return Err(Error::Validation("at least one trust domain is required".to_string()));
        }

        let (bucket1, bucket2) = self.next_buckets(config.num_buckets);
        let first = self.masked_read(config, num_trust_domains, bucket1);
        let second = self.masked_read(config, num_trust_domains, bucket2);
        Ok((first, second))
    }

    fn masked_read(&mut self, config: &LogConfig, num_trust_domains: usize, bucket: u64) -> ReadArgs {
        let vector_len = config.request_vector_len();

        let mut target = vec![0u8; vector_len];
        set_bit(&mut target, bucket as usize);

        let mut td = Vec::with_capacity(num_trust_domains);
        td.push(PirArgs {
            request_vector: Vec::new(),
            pad_seed: self.pad_seed(),
        });
        for _ in 1..num_trust_domains {
            let mut noise = vec![0u8; vector_len];
            self.drbg.fill_bytes(&mut noise);
            xor_into(&mut target, &noise);
            td.push(PirArgs {
                request_vector: noise,
                pad_seed: self.pad_seed(),
            });
        }
        td[0].request_vector = target;

        ReadArgs { td }
    }

    fn pad_seed(&mut self) -> Vec<u8> {
        let mut seed = vec![0u8; SEED_LENGTH];
        self.drbg.fill_bytes(&mut seed);
        seed
    }

    /// Verify and open one sealed message
    pub fn decrypt(&self, sealed: &[u8], nonce: &[u8; crypto::NONCE_LENGTH]) -> Result<Vec<u8>> {
        let secret = self
            .shared_secret
            .as_ref()
            .ok_or(Error::NotInitialized("shared secret"))?;
        let public = self
            .signing_public_key
            .as_ref()
            .ok_or(Error::NotInitialized("signing public key"))?;
        crypto::open(&secret.0, &public.0, nonce, sealed)
    }

    /// Strip every domain's pad from a combined reply and trial-decrypt the
    /// bucket's slots. Returns the first message body sealed for this round.
    pub fn retrieve_response(&self, args: &ReadArgs, reply: &ReadReply, data_size: usize) -> Option<Vec<u8>> {
        if data_size == 0 {
            return None;
        }

        let mut data = reply.data.clone();
        for share in &args.td {
            if let Err(e) = drbg::overlay(&share.pad_seed, &mut data) {
                tracing::debug!(error = %e, "Unusable pad seed");
                return None;
            }
        }

        let nonce = self.nonce();
        data.chunks_exact(data_size)
            .filter_map(|slot| self.decrypt(slot, &nonce).ok())
            .find_map(|plaintext| {
                let body = crypto::unframe(&plaintext)?;
                Some(body.to_vec())
            })
    }

    /// Recover this round's message from `reply` and hand it to the
    /// subscriber, waiting for room under the `Block` policy
    ///
    /// Returns the recovered message. A reply holding nothing for this
    /// handle is logged and yields `None`.
    pub async fn on_response(&self, args: &ReadArgs, reply: &ReadReply, data_size: usize) -> Option<Vec<u8>> {
        if let Some(err) = &reply.err {
            tracing::debug!(seqno = self.seqno, error = %err, "Read failed, no message this round");
            return None;
        }

        let Some(message) = self.retrieve_response(args, reply, data_size) else {
            tracing::debug!(seqno = self.seqno, "No message recovered this round");
            return None;
        };

        if let Some(updates) = &self.updates {
            if !updates.deliver(message.clone()).await {
                tracing::debug!(seqno = self.seqno, "Subscriber gone, message not delivered");
            }
        }
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use pirlog_core::bitvec::{get_bit, set_bits};

    use super::*;
    use crate::topic::Topic;

    fn config() -> LogConfig {
        LogConfig::new(64, 2, 256)
    }

    fn bucket_bytes(config: &LogConfig, slots: &[Option<&[u8]>]) -> Vec<u8> {
        let mut bucket = vec![0u8; config.bucket_size()];
        for (i, slot) in slots.iter().enumerate() {
            if let Some(data) = slot {
                let start = i * config.data_size as usize;
                bucket[start..start + data.len()].copy_from_slice(data);
            }
        }
        bucket
    }

    #[test]
    fn test_uvarint() {
        let mut buf = [0u8; 10];
        assert_eq!(put_uvarint(&mut buf, 1), 1);
        assert_eq!(buf[0], 1);
        assert_eq!(put_uvarint(&mut buf, 300), 2);
        assert_eq!(&buf[..2], &[0xAC, 0x02]);
        assert_eq!(put_uvarint(&mut buf, u64::MAX), 10);
    }

    #[test]
    fn test_next_buckets_deterministic() {
        let a = Handle::new(Seed::from_bytes([1; 32]), Seed::from_bytes([2; 32]));
        let b = Handle::new(Seed::from_bytes([1; 32]), Seed::from_bytes([2; 32]));
        for seqno in 0..20 {
            let pair = a.buckets_at(seqno, 1024);
            assert_eq!(pair, b.buckets_at(seqno, 1024));
            assert!(pair.0 < 1024 && pair.1 < 1024);
        }

        let rounds: std::collections::HashSet<_> = (0..20).map(|s| a.buckets_at(s, 1024)).collect();
        assert!(rounds.len() > 1);
    }

    #[test]
    fn test_generate_poll_requires_keys() {
        let mut handle = Handle::new(Seed::random(), Seed::random());
        assert!(matches!(
            handle.generate_poll(&config(), 2),
            Err(Error::NotInitialized(_))
        ));
    }

    #[test]
    fn test_shares_combine_to_target() {
        let topic = Topic::new();
        let config = config();
        let mut handle = topic.handle();
        let (b1, b2) = handle.next_buckets(config.num_buckets);

        for domains in 1..=4 {
            let (first, second) = handle.generate_poll(&config, domains).unwrap();
            for (args, bucket) in [(first, b1), (second, b2)] {
                assert_eq!(args.td.len(), domains);
                let mut combined = vec![0u8; config.request_vector_len()];
                for share in &args.td {
                    assert_eq!(share.request_vector.len(), config.request_vector_len());
                    assert_eq!(share.pad_seed.len(), SEED_LENGTH);
                    xor_into(&mut combined, &share.request_vector);
                }
                assert_eq!(set_bits(&combined, 64), vec![bucket as usize]);
            }
        }
    }

    #[test]
    fn test_single_share_looks_uniform() {
        let topic = Topic::new();
        let config = LogConfig::new(128, 1, 128);
        let mut handle = topic.handle();
        let (target, _) = handle.next_buckets(config.num_buckets);

        let rounds = 2000;
        let mut hits = [0usize; 2];
        let mut target_hits = [0usize; 2];
        for _ in 0..rounds {
            let (args, _) = handle.generate_poll(&config, 2).unwrap();
            for (d, share) in args.td.iter().enumerate() {
                hits[d] += set_bits(&share.request_vector, 128).len();
                if get_bit(&share.request_vector, target as usize) {
                    target_hits[d] += 1;
                }
            }
        }

        for d in 0..2 {
            // Around half of all bits set, target bit set about half the time
            let density = hits[d] as f64 / (rounds * 128) as f64;
            assert!((0.45..0.55).contains(&density), "domain {} density {}", d, density);
            let target_rate = target_hits[d] as f64 / rounds as f64;
            assert!((0.4..0.6).contains(&target_rate), "domain {} target rate {}", d, target_rate);
        }
    }

    #[test]
    fn test_retrieve_strips_pads_and_finds_message() {
        let config = config();
        let topic = Topic::new();
        let mut handle = topic.handle();
        let publish = topic.generate_publish(&config, b"hello subscriber").unwrap();

        let other = Topic::new().generate_publish(&config, b"someone else").unwrap();
        let mut data = bucket_bytes(&config, &[Some(other.data.as_slice()), Some(publish.data.as_slice())]);

        let (args, _) = handle.generate_poll(&config, 3).unwrap();
        for share in &args.td {
            drbg::overlay(&share.pad_seed, &mut data).unwrap();
        }

        let reply = ReadReply::ok(data);
        let message = handle.retrieve_response(&args, &reply, config.data_size as usize);
        assert_eq!(message, Some(b"hello subscriber".to_vec()));
    }

    #[test]
    fn test_retrieve_ignores_other_rounds() {
        let config = config();
        let mut topic = Topic::new();
        let publish = topic.generate_publish(&config, b"round zero").unwrap();
        topic.advance();

        let mut handle = topic.handle();
        assert_eq!(handle.seqno, 1);
        let (args, _) = handle.generate_poll(&config, 1).unwrap();

        let mut data = bucket_bytes(&config, &[Some(publish.data.as_slice()), None]);
        drbg::overlay(&args.td[0].pad_seed, &mut data).unwrap();
        assert_eq!(
            handle.retrieve_response(&args, &ReadReply::ok(data), config.data_size as usize),
            None
        );
    }

    #[tokio::test]
    async fn test_on_response_delivers() {
        let config = config();
        let topic = Topic::new();
        let mut handle = topic.handle();
        let mut subscription = handle.subscribe(&DeliveryConfig::default());

        let publish = topic.generate_publish(&config, b"delivered").unwrap();
        let (args, _) = handle.generate_poll(&config, 1).unwrap();
        let mut data = bucket_bytes(&config, &[None, Some(publish.data.as_slice())]);
        drbg::overlay(&args.td[0].pad_seed, &mut data).unwrap();

        let got = handle
            .on_response(&args, &ReadReply::ok(data), config.data_size as usize)
            .await;
        assert_eq!(got, Some(b"delivered".to_vec()));
        assert_eq!(subscription.recv().await, Some(b"delivered".to_vec()));

        let failed = handle
            .on_response(&args, &ReadReply::error("boom"), config.data_size as usize)
            .await;
        assert_eq!(failed, None);
        assert_eq!(subscription.try_recv(), None);
    }

    #[test]
    fn test_serde_skips_runtime_state() {
        let topic = Topic::new();
        let mut handle = topic.handle();
        handle.seqno = 7;
        let _subscription = handle.subscribe(&DeliveryConfig::default());

        let json = serde_json::to_string(&handle).unwrap();
        let restored: Handle = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.seqno, 7);
        assert_eq!(restored.seed1, handle.seed1);
        assert_eq!(restored.shared_secret, handle.shared_secret);
        assert!(restored.is_initialized());
        assert!(restored.updates.is_none());
        assert_eq!(restored.buckets_at(3, 512), handle.buckets_at(3, 512));
    }
}
