//! Message sealing: framing, crypto_box encryption and Ed25519 signatures
//!
//! A stored message is exactly `data_size` bytes:
//!
//! ```text
//! box( len:u32 LE | body | zero padding ) | signature (64 bytes)
//! ```
//!
//! The box is XSalsa20-Poly1305 keyed by the topic's shared secret, the
//! signature covers the whole box.

use crypto_box::aead::{generic_array::GenericArray, Aead};
use crypto_box::{SalsaBox, SecretKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use pirlog_core::Error;

/// Detached signature length
pub const SIGNATURE_LENGTH: usize = ed25519_dalek::SIGNATURE_LENGTH;

/// Poly1305 tag added by the box
pub const BOX_OVERHEAD: usize = 16;

/// XSalsa20 nonce length
pub const NONCE_LENGTH: usize = 24;

/// Length prefix in front of every body
pub const FRAME_HEADER: usize = 4;

/// Key length for both the box secret and the signing key
pub const KEY_LENGTH: usize = 32;

/// Largest body that fits a `data_size` message
pub fn max_message_len(data_size: usize) -> Option<usize> {
    data_size.checked_sub(FRAME_HEADER + BOX_OVERHEAD + SIGNATURE_LENGTH)
}

/// Nonce for sequence number `seqno`: u64 LE in the first 8 bytes
pub fn nonce(seqno: u64) -> [u8; NONCE_LENGTH] {
    let mut nonce = [0u8; NONCE_LENGTH];
    nonce[..8].copy_from_slice(&seqno.to_le_bytes());
    nonce
}

/// Length-prefix `message` and zero-pad it to the plaintext size of a
/// `data_size` message
pub fn frame(message: &[u8], data_size: usize) -> pirlog_core::Result<Vec<u8>> {
    let capacity = max_message_len(data_size).ok_or_else(|| {
        Error::Validation(format!("data_size {} cannot hold a sealed message", data_size))
    })?;
    if message.len() > capacity {
        return Err(Error::Validation(format!(
            "message is {} bytes, at most {} fit",
            message.len(),
            capacity
        )));
    }

    let mut framed = vec![0u8; capacity + FRAME_HEADER];
    framed[..FRAME_HEADER].copy_from_slice(&(message.len() as u32).to_le_bytes());
    framed[FRAME_HEADER..FRAME_HEADER + message.len()].copy_from_slice(message);
    Ok(framed)
}

/// Body of a framed plaintext, or `None` if the length prefix overruns it
pub fn unframe(framed: &[u8]) -> Option<&[u8]> {
    let header: [u8; FRAME_HEADER] = framed.get(..FRAME_HEADER)?.try_into().ok()?;
    let len = u32::from_le_bytes(header) as usize;
    framed.get(FRAME_HEADER..FRAME_HEADER.checked_add(len)?)
}

fn salsa_box(secret: &[u8; KEY_LENGTH]) -> SalsaBox {
    let secret = SecretKey::from(*secret);
    SalsaBox::new(&secret.public_key(), &secret)
}

/// Encrypt then sign
pub fn seal(
    secret: &[u8; KEY_LENGTH],
    signing_key: &SigningKey,
    nonce: &[u8; NONCE_LENGTH],
    plaintext: &[u8],
) -> pirlog_core::Result<Vec<u8>> {
    let mut sealed = salsa_box(secret)
        .encrypt(GenericArray::from_slice(nonce), plaintext)
        .map_err(|_| Error::Validation("encryption failed".to_string()))?;
    let signature = signing_key.sign(&sealed);
    sealed.extend_from_slice(&signature.to_bytes());
    Ok(sealed)
}

/// Verify then decrypt. Every failure is the same `Error::Decryption`.
pub fn open(
    secret: &[u8; KEY_LENGTH],
    verifying_key: &[u8; KEY_LENGTH],
    nonce: &[u8; NONCE_LENGTH],
    sealed: &[u8],
) -> pirlog_core::Result<Vec<u8>> {
    let split = sealed
        .len()
        .checked_sub(SIGNATURE_LENGTH)
        .ok_or(Error::Decryption)?;
    let (ciphertext, signature) = sealed.split_at(split);

    let signature: [u8; SIGNATURE_LENGTH] =
        signature.try_into().map_err(|_| Error::Decryption)?;
    let verifying_key = VerifyingKey::from_bytes(verifying_key).map_err(|_| Error::Decryption)?;
    verifying_key
        .verify(ciphertext, &Signature::from_bytes(&signature))
        .map_err(|_| Error::Decryption)?;

    salsa_box(secret)
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Decryption)
}
