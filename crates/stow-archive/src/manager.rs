//! Live archive: the tree behind the gateway's archive routes
//!
//! The tree loads asynchronously at process start; structural queries are
//! rejected until the load completes so callers never act on a snapshot
//! about to be replaced. Mutations mark the tree dirty; a single-writer
//! background task coalesces bursts into debounced atomic writes, and an
//! explicit `flush()` covers shutdown.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::{watch, Notify};
use tracing::{info, warn};

use stow_core::{StowError, StowResult};
use stow_share::ShareDescriptor;

use crate::list::FileDataLog;
use crate::snapshot;
use crate::tree::VirtualNode;

const FLUSH_DEBOUNCE_MS: u64 = 500;

/// One row of a folder listing.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub name: String,
    pub folder: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub last_modified: u64,
}

pub struct ArchiveManager {
    path: PathBuf,
    root: RwLock<VirtualNode>,
    loaded: watch::Sender<bool>,
    dirty: Notify,
}

impl ArchiveManager {
    pub fn new(path: impl AsRef<Path>) -> Arc<Self> {
        let (loaded, _) = watch::channel(false);
        Arc::new(Self {
            path: path.as_ref().to_path_buf(),
            root: RwLock::new(VirtualNode::folder("")),
            loaded,
            dirty: Notify::new(),
        })
    }

    /// Read the persisted snapshot and mark the archive ready. A missing or
    /// unreadable snapshot starts an empty tree rather than failing startup.
    pub async fn load(&self) {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match snapshot::from_bytes(&bytes) {
                Ok(root) => {
                    let files = root.file_count();
                    *self.root.write().expect("archive lock poisoned") = root;
                    info!(path = %self.path.display(), files, "archive loaded");
                }
                Err(e) => {
                    warn!(path = %self.path.display(), "archive snapshot unreadable: {e} (starting empty)");
                }
            },
            Err(_) => {
                info!(path = %self.path.display(), "no archive snapshot, starting empty");
            }
        }
        self.loaded.send_replace(true);
    }

    pub fn spawn_load(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move { manager.load().await })
    }

    /// Background flush task consuming the dirty signal.
    pub fn spawn_flusher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                manager.dirty.notified().await;
                tokio::time::sleep(std::time::Duration::from_millis(FLUSH_DEBOUNCE_MS)).await;
                if let Err(e) = manager.flush() {
                    warn!("archive flush failed: {e}");
                }
            }
        })
    }

    pub fn loaded(&self) -> bool {
        *self.loaded.borrow()
    }

    pub async fn wait_loaded(&self) {
        let mut rx = self.loaded.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    fn ensure_loaded(&self) -> StowResult<()> {
        if self.loaded() {
            Ok(())
        } else {
            Err(StowError::Other(anyhow::anyhow!("archive is still loading")))
        }
    }

    fn mark_dirty(&self) {
        self.dirty.notify_one();
    }

    /// Write the current tree to disk immediately (tmp + rename).
    pub fn flush(&self) -> StowResult<()> {
        let bytes = {
            let root = self.root.read().expect("archive lock poisoned");
            snapshot::to_bytes(&root)
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    // ── Structural operations ─────────────────────────────────────────────

    /// Add a file leaf at `path` (the last component is the leaf name).
    pub fn add_file(&self, path: &str, descriptor: ShareDescriptor) -> StowResult<()> {
        self.ensure_loaded()?;
        let (parent, name) = split_leaf(path)?;
        {
            let mut root = self.root.write().expect("archive lock poisoned");
            root.insert(parent, VirtualNode::file(name, descriptor))?;
        }
        self.mark_dirty();
        Ok(())
    }

    pub fn mkdir(&self, path: &str) -> StowResult<()> {
        self.ensure_loaded()?;
        let (parent, name) = split_leaf(path)?;
        {
            let mut root = self.root.write().expect("archive lock poisoned");
            root.insert(parent, VirtualNode::folder(name))?;
        }
        self.mark_dirty();
        Ok(())
    }

    pub fn list(&self, path: &str) -> StowResult<Vec<NodeSummary>> {
        self.ensure_loaded()?;
        let root = self.root.read().expect("archive lock poisoned");
        let node = root
            .get(path)
            .ok_or_else(|| StowError::NotFound(path.to_string()))?;
        let children = node
            .children()
            .ok_or_else(|| StowError::NotFound(format!("{path} is not a folder")))?;
        Ok(children
            .values()
            .map(|child| NodeSummary {
                name: child.name.clone(),
                folder: child.is_folder(),
                size: child.descriptor().map(|d| d.file_size),
                last_modified: child.last_modified,
            })
            .collect())
    }

    pub fn get_descriptor(&self, path: &str) -> StowResult<ShareDescriptor> {
        self.ensure_loaded()?;
        let root = self.root.read().expect("archive lock poisoned");
        root.get(path)
            .and_then(|node| node.descriptor().cloned())
            .ok_or_else(|| StowError::NotFound(path.to_string()))
    }

    pub fn remove(&self, path: &str) -> StowResult<()> {
        self.ensure_loaded()?;
        {
            let mut root = self.root.write().expect("archive lock poisoned");
            root.remove(path)?;
        }
        self.mark_dirty();
        Ok(())
    }

    /// Merge a foreign subtree in at `at_path`.
    pub fn import_subtree(&self, subtree: VirtualNode, at_path: &str) -> StowResult<()> {
        self.ensure_loaded()?;
        {
            let mut root = self.root.write().expect("archive lock poisoned");
            root.merge_at(at_path, subtree)?;
        }
        self.mark_dirty();
        Ok(())
    }

    /// Import a downloaded archive snapshot, merging into the live tree.
    pub fn import_snapshot(&self, bytes: &[u8]) -> StowResult<usize> {
        let subtree = snapshot::from_bytes(bytes)?;
        let files = subtree.file_count();
        self.import_subtree(subtree, "/")?;
        Ok(files)
    }

    /// Import a plain file list, one folder per category.
    pub fn import_file_list(&self, entries: &[FileDataLog]) -> StowResult<usize> {
        self.ensure_loaded()?;
        let mut imported = 0usize;
        {
            let mut root = self.root.write().expect("archive lock poisoned");
            for entry in entries {
                let descriptor = match stow_share::resolve(&entry.share_code) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(name = %entry.name, "skipping list entry: {e}");
                        continue;
                    }
                };
                root.insert(&entry.category, VirtualNode::file(&entry.name, descriptor))?;
                imported += 1;
            }
        }
        self.mark_dirty();
        Ok(imported)
    }

    /// Serialized form of the current tree, for export through the engine.
    pub fn export_snapshot(&self) -> StowResult<Vec<u8>> {
        self.ensure_loaded()?;
        let root = self.root.read().expect("archive lock poisoned");
        Ok(snapshot::to_bytes(&root))
    }

    pub fn file_count(&self) -> usize {
        self.root.read().expect("archive lock poisoned").file_count()
    }
}

fn split_leaf(path: &str) -> StowResult<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => {
            let (parent, name) = trimmed.split_at(pos);
            let name = &name[1..];
            if name.is_empty() {
                return Err(StowError::NotFound(format!("empty node name in {path}")));
            }
            Ok((parent, name))
        }
        None if !trimmed.is_empty() => Ok(("", trimmed)),
        _ => Err(StowError::NotFound(format!("empty node name in {path}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stow_crypto::{FileKey, KEY_SIZE};

    fn descriptor(name: &str) -> ShareDescriptor {
        ShareDescriptor {
            version: ShareDescriptor::VERSION,
            file_name: name.into(),
            file_size: 128,
            chunk_size: 1_048_576,
            key: FileKey::from_bytes([4u8; KEY_SIZE]),
            backend: "line-a".into(),
            referer: None,
            chunks: vec![],
        }
    }

    async fn loaded_manager(dir: &tempfile::TempDir) -> Arc<ArchiveManager> {
        let manager = ArchiveManager::new(dir.path().join("archive.bin"));
        manager.load().await;
        manager
    }

    #[tokio::test]
    async fn rejects_queries_until_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ArchiveManager::new(dir.path().join("archive.bin"));

        assert!(!manager.loaded());
        assert!(manager.list("/").is_err());
        assert!(manager.add_file("/a.txt", descriptor("a.txt")).is_err());

        manager.load().await;
        assert!(manager.loaded());
        assert!(manager.list("/").unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_list_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let manager = loaded_manager(&dir).await;

        manager.add_file("/docs/report.pdf", descriptor("report.pdf")).unwrap();
        manager.mkdir("/docs/drafts").unwrap();

        let rows = manager.list("/docs").unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.name == "report.pdf" && !r.folder && r.size == Some(128)));
        assert!(rows.iter().any(|r| r.name == "drafts" && r.folder));

        let d = manager.get_descriptor("/docs/report.pdf").unwrap();
        assert_eq!(d.file_name, "report.pdf");

        manager.remove("/docs/report.pdf").unwrap();
        assert!(matches!(
            manager.get_descriptor("/docs/report.pdf"),
            Err(StowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_missing_path_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = loaded_manager(&dir).await;
        assert!(matches!(manager.list("/nope"), Err(StowError::NotFound(_))));
    }

    #[tokio::test]
    async fn snapshot_import_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let source = loaded_manager(&dir).await;
        source.add_file("/a/x.txt", descriptor("x.txt")).unwrap();
        source.add_file("/y.txt", descriptor("y.txt")).unwrap();
        let bytes = source.export_snapshot().unwrap();

        let dir2 = tempfile::tempdir().unwrap();
        let target = loaded_manager(&dir2).await;
        assert_eq!(target.import_snapshot(&bytes).unwrap(), 2);
        assert_eq!(target.file_count(), 2);

        // Importing the same archive again changes nothing
        target.import_snapshot(&bytes).unwrap();
        assert_eq!(target.file_count(), 2);
        assert!(target.get_descriptor("/a/x.txt").is_ok());
    }

    #[tokio::test]
    async fn file_list_import_groups_by_category() {
        let dir = tempfile::tempdir().unwrap();
        let manager = loaded_manager(&dir).await;

        let entries = vec![
            FileDataLog {
                share_code: stow_share::encode(&descriptor("clip.mp4")),
                name: "clip.mp4".into(),
                size: 128,
                time: 1_700_000_000,
                category: "videos".into(),
            },
            FileDataLog {
                share_code: "garbage".into(),
                name: "broken".into(),
                size: 0,
                time: 0,
                category: "videos".into(),
            },
        ];

        let imported = manager.import_file_list(&entries).unwrap();
        assert_eq!(imported, 1, "unparseable entries are skipped");
        assert!(manager.get_descriptor("/videos/clip.mp4").is_ok());
    }

    #[tokio::test]
    async fn flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.bin");

        let manager = ArchiveManager::new(&path);
        manager.load().await;
        manager.add_file("/keep.txt", descriptor("keep.txt")).unwrap();
        manager.flush().unwrap();

        let reloaded = ArchiveManager::new(&path);
        reloaded.load().await;
        assert_eq!(reloaded.file_count(), 1);
        assert!(reloaded.get_descriptor("/keep.txt").is_ok());
    }

    #[tokio::test]
    async fn flusher_persists_burst() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.bin");

        let manager = ArchiveManager::new(&path);
        manager.load().await;
        let _task = manager.spawn_flusher();

        for i in 0..10 {
            manager.add_file(&format!("/f{i}.bin"), descriptor("f")).unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(FLUSH_DEBOUNCE_MS * 3)).await;

        let reloaded = ArchiveManager::new(&path);
        reloaded.load().await;
        assert_eq!(reloaded.file_count(), 10);
    }

    #[tokio::test]
    async fn wait_loaded_unblocks() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ArchiveManager::new(dir.path().join("archive.bin"));

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.wait_loaded().await })
        };
        manager.load().await;
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("wait_loaded returned")
            .unwrap();
    }
}
