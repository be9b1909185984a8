//! Per-chunk AES-256-GCM encryption/decryption
//!
//! Encrypted chunk format (binary):
//! ```text
//! [N bytes: ciphertext][16 bytes: GCM tag]
//! nonce = 4 zero bytes || chunk_index (8 bytes, big-endian)
//! ```
//!
//! The nonce is derived from the chunk index instead of being stored. Each
//! file gets a fresh random key, so (key, nonce) pairs are never reused, and
//! decrypting a chunk under the wrong index fails authentication — chunks
//! cannot be silently reordered.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};

use stow_core::{StowError, StowResult};

use crate::keys::FileKey;
use crate::NONCE_SIZE;

/// GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

fn nonce_for(chunk_index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[4..].copy_from_slice(&chunk_index.to_be_bytes());
    nonce
}

/// Encrypt a single chunk.
///
/// Returns `ciphertext ++ 16-byte tag`.
pub fn encrypt_chunk(key: &FileKey, chunk_index: u64, plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce_bytes = nonce_for(chunk_index);
    let nonce = Nonce::from_slice(&nonce_bytes);

    // AES-GCM encryption is infallible for inputs under the 64 GiB GCM
    // limit; chunks are capped at 20 MiB.
    cipher
        .encrypt(nonce, plaintext)
        .expect("chunk within AES-GCM message limit")
}

/// Decrypt a single chunk, verifying the authentication tag.
///
/// Any tampering, truncation, or index mismatch yields
/// [`StowError::Integrity`] — altered plaintext is never returned.
pub fn decrypt_chunk(key: &FileKey, chunk_index: u64, data: &[u8]) -> StowResult<Vec<u8>> {
    if data.len() < TAG_SIZE {
        return Err(StowError::Integrity);
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce_bytes = nonce_for(chunk_index);
    let nonce = Nonce::from_slice(&nonce_bytes);

    cipher.decrypt(nonce, data).map_err(|_| StowError::Integrity)
}
