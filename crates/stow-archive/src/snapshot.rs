//! Archive snapshot serialization
//!
//! Versioned JSON under zstd. Exported archives carry the `.stow_arc`
//! suffix, exported plain file-lists `.stow_list` — the name alone tells an
//! importer which decoder to use.

use serde::{Deserialize, Serialize};
use stow_core::{StowError, StowResult};

use crate::tree::VirtualNode;

pub const ARCHIVE_SUFFIX: &str = ".stow_arc";
pub const FILE_LIST_SUFFIX: &str = ".stow_list";

const SNAPSHOT_VERSION: u32 = 1;
const ZSTD_LEVEL: i32 = 9;

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    root: VirtualNode,
}

/// Serialize a tree to its compact persisted/exported form.
pub fn to_bytes(root: &VirtualNode) -> Vec<u8> {
    let envelope = Envelope {
        version: SNAPSHOT_VERSION,
        root: root.clone(),
    };
    let json = serde_json::to_vec(&envelope).expect("tree serializes");
    zstd::encode_all(json.as_slice(), ZSTD_LEVEL).expect("zstd in-memory encode")
}

/// Parse a snapshot back into a tree.
pub fn from_bytes(bytes: &[u8]) -> StowResult<VirtualNode> {
    let json = zstd::decode_all(bytes)
        .map_err(|e| StowError::MalformedDescriptor(format!("archive decompress: {e}")))?;
    let envelope: Envelope = serde_json::from_slice(&json)
        .map_err(|e| StowError::MalformedDescriptor(format!("archive parse: {e}")))?;
    if envelope.version != SNAPSHOT_VERSION {
        return Err(StowError::MalformedDescriptor(format!(
            "unsupported archive version {}",
            envelope.version
        )));
    }
    Ok(envelope.root)
}
