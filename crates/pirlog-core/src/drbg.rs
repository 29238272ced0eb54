//! Deterministic random bit generator
//!
//! Uses AES-128 in counter mode to expand a 32-byte seed into a
//! reproducible keystream. The first half of the seed is the AES key, the
//! second half the initial counter block.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::Error;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Seed length in bytes
pub const SEED_LENGTH: usize = 32;

/// DRBG seed (32 bytes)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed(#[serde(with = "crate::wire::hex_array")] [u8; SEED_LENGTH]);

impl Seed {
    /// Draw a fresh seed from the OS RNG
    pub fn random() -> Self {
        let mut bytes = [0u8; SEED_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SEED_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse a seed from a slice of exactly `SEED_LENGTH` bytes
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        let bytes: [u8; SEED_LENGTH] = bytes.try_into().map_err(|_| {
            Error::Validation(format!(
                "seed must be {} bytes, got {}",
                SEED_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SEED_LENGTH] {
        &self.0
    }

    /// First 16 bytes as two little-endian u64 halves, for keyed hashing
    pub fn key_u128(&self) -> (u64, u64) {
        let mut k0 = [0u8; 8];
        let mut k1 = [0u8; 8];
        k0.copy_from_slice(&self.0[..8]);
        k1.copy_from_slice(&self.0[8..16]);
        (u64::from_le_bytes(k0), u64::from_le_bytes(k1))
    }

    fn keystream(&self) -> Aes128Ctr {
        let mut key = [0u8; 16];
        let mut iv = [0u8; 16];
        key.copy_from_slice(&self.0[..16]);
        iv.copy_from_slice(&self.0[16..]);
        Aes128Ctr::new(&key.into(), &iv.into())
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Seed(..)")
    }
}

/// Keystream-backed generator. Successive calls continue the same stream.
pub struct Drbg {
    stream: Aes128Ctr,
}

impl Drbg {
    /// Create a generator from `seed`, or from a fresh random seed
    pub fn new(seed: Option<Seed>) -> Self {
        let seed = seed.unwrap_or_else(Seed::random);
        Self {
            stream: seed.keystream(),
        }
    }

    /// Overwrite `out` with the next `out.len()` keystream bytes
    pub fn fill_bytes(&mut self, out: &mut [u8]) {
        out.fill(0);
        self.stream.apply_keystream(out);
    }

    /// Draw a fresh seed from this generator
    pub fn next_seed(&mut self) -> Seed {
        let mut bytes = [0u8; SEED_LENGTH];
        self.fill_bytes(&mut bytes);
        Seed(bytes)
    }
}

/// XOR the keystream of `seed` into `data` in place
///
/// Applying the same seed twice restores the original bytes, so this both
/// adds and strips a response pad.
pub fn overlay(seed: &[u8], data: &mut [u8]) -> crate::Result<()> {
    let seed = Seed::from_slice(seed)?;
    seed.keystream().apply_keystream(data);
    Ok(())
}
