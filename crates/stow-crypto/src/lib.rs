//! stow-crypto: per-chunk authenticated encryption and the image disguise
//!
//! - `keys`: the per-file 256-bit `FileKey`
//! - `chunk`: AES-256-GCM with index-derived nonces
//! - `disguise`: filler-prefix packing so blobs look like image files
//! - `filler`: minimal valid GIF89a generation for the default filler

pub mod chunk;
pub mod disguise;
pub mod filler;
pub mod keys;

pub use chunk::{decrypt_chunk, encrypt_chunk, TAG_SIZE};
pub use disguise::{pack, unpack};
pub use filler::{random_filler, solid_gif};
pub use keys::FileKey;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;
/// AES-GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;
