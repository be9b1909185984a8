//! Share descriptor model
//!
//! The descriptor is self-describing and versioned: chunk-size or field
//! changes never break descriptors that are already in the wild. Field names
//! are single characters to keep many-chunk descriptors compact on the wire.

use serde::{Deserialize, Serialize};
use stow_crypto::FileKey;

/// Where one chunk lives on the backing host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLocation {
    /// Remote location returned by the backend at upload time.
    #[serde(rename = "u")]
    pub url: String,
    /// Filler prefix length to skip when unpacking this chunk's blob.
    #[serde(rename = "h")]
    pub head: u32,
}

/// Everything needed to re-fetch and decrypt a stored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareDescriptor {
    #[serde(rename = "v")]
    pub version: u8,
    #[serde(rename = "n")]
    pub file_name: String,
    #[serde(rename = "s")]
    pub file_size: u64,
    /// Chunk size in bytes used at upload time.
    #[serde(rename = "c")]
    pub chunk_size: u64,
    #[serde(rename = "k")]
    pub key: FileKey,
    /// Identifier of the backend that stored the chunks, used to
    /// reconstruct fetch semantics.
    #[serde(rename = "b")]
    pub backend: String,
    /// Referer header required by some hosts on download.
    #[serde(rename = "r", default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    /// One location per chunk, in chunk-index order.
    #[serde(rename = "l")]
    pub chunks: Vec<ChunkLocation>,
}

impl ShareDescriptor {
    pub const VERSION: u8 = 1;

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// A copy pointing at the same chunks under a new file name. The
    /// original descriptor stays valid — renames never touch remote data.
    pub fn renamed(&self, file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..self.clone()
        }
    }
}
