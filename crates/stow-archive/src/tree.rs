//! Tree structure and path operations
//!
//! Invariants: children are owned exclusively by their parent (a tree, not a
//! graph); names are unique within one folder, with last-write-wins on
//! collision; every non-folder node carries exactly one descriptor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stow_core::{StowError, StowResult};
use stow_share::ShareDescriptor;

pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeKind {
    Folder { children: BTreeMap<String, VirtualNode> },
    File { descriptor: ShareDescriptor },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualNode {
    pub name: String,
    pub last_modified: u64,
    pub kind: NodeKind,
}

impl VirtualNode {
    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_modified: now_secs(),
            kind: NodeKind::Folder {
                children: BTreeMap::new(),
            },
        }
    }

    pub fn file(name: impl Into<String>, descriptor: ShareDescriptor) -> Self {
        Self {
            name: name.into(),
            last_modified: now_secs(),
            kind: NodeKind::File { descriptor },
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder { .. })
    }

    pub fn descriptor(&self) -> Option<&ShareDescriptor> {
        match &self.kind {
            NodeKind::File { descriptor } => Some(descriptor),
            NodeKind::Folder { .. } => None,
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, VirtualNode>> {
        match &self.kind {
            NodeKind::Folder { children } => Some(children),
            NodeKind::File { .. } => None,
        }
    }

    fn children_mut(&mut self) -> Option<&mut BTreeMap<String, VirtualNode>> {
        match &mut self.kind {
            NodeKind::Folder { children } => Some(children),
            NodeKind::File { .. } => None,
        }
    }

    /// Walk to the node at `path` ("/" or "" is this node).
    pub fn get(&self, path: &str) -> Option<&VirtualNode> {
        let mut current = self;
        for part in split_path(path) {
            current = current.children()?.get(part)?;
        }
        Some(current)
    }

    /// Insert `node` under the folder at `parent_path`, creating intermediate
    /// folders. A non-folder in the way is replaced by a folder (last write
    /// wins applies to the path as well as the leaf).
    pub fn insert(&mut self, parent_path: &str, node: VirtualNode) -> StowResult<()> {
        let mut current = self;
        for part in split_path(parent_path) {
            current.last_modified = now_secs();
            if !current.is_folder() {
                current.kind = NodeKind::Folder {
                    children: BTreeMap::new(),
                };
            }
            let children = current.children_mut().expect("current is a folder");
            let entry = children
                .entry(part.to_string())
                .or_insert_with(|| VirtualNode::folder(part));
            if !entry.is_folder() {
                *entry = VirtualNode::folder(part);
            }
            current = entry;
        }

        current.last_modified = now_secs();
        match current.children_mut() {
            Some(children) => {
                children.insert(node.name.clone(), node);
                Ok(())
            }
            None => Err(StowError::NotFound(format!(
                "{parent_path} is not a folder"
            ))),
        }
    }

    /// Remove the node at `path`.
    pub fn remove(&mut self, path: &str) -> StowResult<VirtualNode> {
        let parts: Vec<&str> = split_path(path).collect();
        let Some((leaf, parents)) = parts.split_last() else {
            return Err(StowError::NotFound("cannot remove the root".into()));
        };

        let mut current = self;
        for part in parents {
            current = current
                .children_mut()
                .and_then(|c| c.get_mut(*part))
                .ok_or_else(|| StowError::NotFound(path.to_string()))?;
        }
        current.last_modified = now_secs();
        current
            .children_mut()
            .and_then(|c| c.remove(*leaf))
            .ok_or_else(|| StowError::NotFound(path.to_string()))
    }

    /// Merge another subtree into this folder: same-named folders recurse,
    /// same-named leaves (and folder/file mismatches) are overwritten.
    /// Merging the same subtree twice is a no-op the second time.
    pub fn merge(&mut self, other: VirtualNode) {
        let VirtualNode { kind, .. } = other;
        let NodeKind::Folder { children: incoming } = kind else {
            return;
        };
        self.last_modified = now_secs();
        let Some(children) = self.children_mut() else {
            return;
        };

        for (name, node) in incoming {
            match children.get_mut(&name) {
                Some(existing) if existing.is_folder() && node.is_folder() => {
                    existing.merge(node);
                }
                _ => {
                    children.insert(name, node);
                }
            }
        }
    }

    /// Merge `subtree` into the folder at `path`, creating intermediate
    /// folders as needed.
    pub fn merge_at(&mut self, path: &str, subtree: VirtualNode) -> StowResult<()> {
        let mut current = self;
        for part in split_path(path) {
            current.last_modified = now_secs();
            if !current.is_folder() {
                current.kind = NodeKind::Folder {
                    children: BTreeMap::new(),
                };
            }
            let children = current.children_mut().expect("current is a folder");
            let entry = children
                .entry(part.to_string())
                .or_insert_with(|| VirtualNode::folder(part));
            if !entry.is_folder() {
                *entry = VirtualNode::folder(part);
            }
            current = entry;
        }
        current.merge(subtree);
        Ok(())
    }

    /// Total number of file leaves under this node.
    pub fn file_count(&self) -> usize {
        match &self.kind {
            NodeKind::File { .. } => 1,
            NodeKind::Folder { children } => children.values().map(VirtualNode::file_count).sum(),
        }
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|p| !p.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stow_crypto::{FileKey, KEY_SIZE};

    fn descriptor(name: &str) -> ShareDescriptor {
        ShareDescriptor {
            version: ShareDescriptor::VERSION,
            file_name: name.into(),
            file_size: 42,
            chunk_size: 1_048_576,
            key: FileKey::from_bytes([1u8; KEY_SIZE]),
            backend: "line-a".into(),
            referer: None,
            chunks: vec![],
        }
    }

    fn root() -> VirtualNode {
        VirtualNode::folder("")
    }

    #[test]
    fn insert_and_get() {
        let mut tree = root();
        tree.insert("/", VirtualNode::file("a.txt", descriptor("a.txt"))).unwrap();

        let node = tree.get("/a.txt").unwrap();
        assert!(!node.is_folder());
        assert_eq!(node.descriptor().unwrap().file_name, "a.txt");
    }

    #[test]
    fn insert_auto_creates_intermediate_folders() {
        let mut tree = root();
        tree.insert("/movies/2024", VirtualNode::file("x.mp4", descriptor("x.mp4")))
            .unwrap();

        assert!(tree.get("/movies").unwrap().is_folder());
        assert!(tree.get("/movies/2024").unwrap().is_folder());
        assert!(tree.get("/movies/2024/x.mp4").is_some());
    }

    #[test]
    fn duplicate_name_last_write_wins() {
        let mut tree = root();
        let mut first = descriptor("a.txt");
        first.file_size = 1;
        let mut second = descriptor("a.txt");
        second.file_size = 2;

        tree.insert("/", VirtualNode::file("a.txt", first)).unwrap();
        tree.insert("/", VirtualNode::file("a.txt", second)).unwrap();

        let children = tree.children().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(tree.get("/a.txt").unwrap().descriptor().unwrap().file_size, 2);
    }

    #[test]
    fn remove_missing_is_not_found() {
        let mut tree = root();
        let result = tree.remove("/nope/missing.txt");
        assert!(matches!(result, Err(StowError::NotFound(_))));
    }

    #[test]
    fn remove_returns_the_node() {
        let mut tree = root();
        tree.insert("/docs", VirtualNode::file("r.pdf", descriptor("r.pdf"))).unwrap();

        let removed = tree.remove("/docs/r.pdf").unwrap();
        assert_eq!(removed.name, "r.pdf");
        assert!(tree.get("/docs/r.pdf").is_none());
        assert!(tree.get("/docs").is_some(), "parent folder survives");
    }

    #[test]
    fn merge_recurses_into_same_named_folders() {
        let mut tree = root();
        tree.insert("/shared", VirtualNode::file("old.txt", descriptor("old.txt")))
            .unwrap();

        let mut incoming = root();
        incoming
            .insert("/shared", VirtualNode::file("new.txt", descriptor("new.txt")))
            .unwrap();

        tree.merge(incoming);

        assert!(tree.get("/shared/old.txt").is_some());
        assert!(tree.get("/shared/new.txt").is_some());
    }

    #[test]
    fn merge_overwrites_same_named_leaves() {
        let mut tree = root();
        let mut mine = descriptor("f.bin");
        mine.file_size = 1;
        tree.insert("/", VirtualNode::file("f.bin", mine)).unwrap();

        let mut incoming = root();
        let mut theirs = descriptor("f.bin");
        theirs.file_size = 2;
        incoming.insert("/", VirtualNode::file("f.bin", theirs)).unwrap();

        tree.merge(incoming);
        assert_eq!(tree.get("/f.bin").unwrap().descriptor().unwrap().file_size, 2);
        assert_eq!(tree.file_count(), 1);
    }

    #[test]
    fn merge_twice_equals_merge_once() {
        let mut incoming = root();
        incoming
            .insert("/a/b", VirtualNode::file("x.txt", descriptor("x.txt")))
            .unwrap();
        incoming
            .insert("/a", VirtualNode::file("y.txt", descriptor("y.txt")))
            .unwrap();

        let mut once = root();
        once.merge(incoming.clone());

        let mut twice = root();
        twice.merge(incoming.clone());
        twice.merge(incoming);

        assert_eq!(once.file_count(), twice.file_count());
        assert_eq!(
            once.get("/a/b/x.txt").unwrap().descriptor(),
            twice.get("/a/b/x.txt").unwrap().descriptor()
        );
    }

    #[test]
    fn file_count_spans_the_tree() {
        let mut tree = root();
        tree.insert("/a", VirtualNode::file("1", descriptor("1"))).unwrap();
        tree.insert("/a/b", VirtualNode::file("2", descriptor("2"))).unwrap();
        tree.insert("/", VirtualNode::file("3", descriptor("3"))).unwrap();
        assert_eq!(tree.file_count(), 3);
    }
}
