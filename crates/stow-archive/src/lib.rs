//! stow-archive: a virtual tree of shared files
//!
//! Folders contain named children; every leaf carries exactly one share
//! descriptor. The tree persists as a compressed snapshot, and a snapshot is
//! just another file — uploading one through the transfer engine yields a
//! share code that moves a whole archive between devices.

pub mod list;
pub mod manager;
pub mod snapshot;
pub mod tree;

pub use list::{decode_list, encode_list, FileDataLog};
pub use manager::{ArchiveManager, NodeSummary};
pub use snapshot::{from_bytes, to_bytes, ARCHIVE_SUFFIX, FILE_LIST_SUFFIX};
pub use tree::{NodeKind, VirtualNode};
