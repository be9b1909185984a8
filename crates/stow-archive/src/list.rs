//! Upload-history records and exported file lists
//!
//! A file list is the lightweight sibling of a full archive: a flat set of
//! records, one per shared file, grouped by category. Exported lists use the
//! same compressed-JSON envelope discipline as snapshots.

use serde::{Deserialize, Serialize};
use stow_core::{StowError, StowResult};

pub const DEFAULT_CATEGORY: &str = "default";

const ZSTD_LEVEL: i32 = 9;

/// One user-facing record of a shared file. Identity is the pair
/// (share code, category): the same blob may appear under two categories as
/// two logical entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDataLog {
    #[serde(rename = "share")]
    pub share_code: String,
    pub name: String,
    pub size: u64,
    /// Creation time, unix seconds.
    pub time: u64,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl FileDataLog {
    /// Same underlying blob, regardless of category or name.
    pub fn is_similar(&self, other: &FileDataLog) -> bool {
        self.share_code == other.share_code
    }
}

impl PartialEq for FileDataLog {
    fn eq(&self, other: &Self) -> bool {
        self.is_similar(other) && self.category == other.category
    }
}

impl Eq for FileDataLog {}

/// Serialize a file list for export.
pub fn encode_list(entries: &[FileDataLog]) -> Vec<u8> {
    let json = serde_json::to_vec(entries).expect("file list serializes");
    zstd::encode_all(json.as_slice(), ZSTD_LEVEL).expect("zstd in-memory encode")
}

/// Parse an exported file list.
pub fn decode_list(bytes: &[u8]) -> StowResult<Vec<FileDataLog>> {
    let json = zstd::decode_all(bytes)
        .map_err(|e| StowError::MalformedDescriptor(format!("file list decompress: {e}")))?;
    serde_json::from_slice(&json)
        .map_err(|e| StowError::MalformedDescriptor(format!("file list parse: {e}")))
}
