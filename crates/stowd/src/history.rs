//! Upload history
//!
//! A capped list of `FileDataLog` records persisted as JSON beside the
//! archive. Entries store the raw share code; the short-code form is a
//! presentation concern of the routes. Renaming re-derives a fresh
//! descriptor with the new name — the old descriptor (and the remote
//! chunks) are never touched.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;

use stow_archive::list::DEFAULT_CATEGORY;
use stow_archive::FileDataLog;
use stow_core::{StowError, StowResult};

const HISTORY_LIMIT: usize = 1000;
const FLUSH_DEBOUNCE_MS: u64 = 500;

pub struct HistoryStore {
    path: Option<PathBuf>,
    entries: RwLock<Vec<FileDataLog>>,
    dirty: Notify,
}

impl HistoryStore {
    pub fn open(path: impl AsRef<Path>) -> Arc<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<FileDataLog>>(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "history parse failed: {e} (starting empty)");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Arc::new(Self {
            path: Some(path),
            entries: RwLock::new(entries),
            dirty: Notify::new(),
        })
    }

    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self {
            path: None,
            entries: RwLock::new(Vec::new()),
            dirty: Notify::new(),
        })
    }

    pub fn spawn_flusher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                store.dirty.notified().await;
                tokio::time::sleep(std::time::Duration::from_millis(FLUSH_DEBOUNCE_MS)).await;
                if let Err(e) = store.flush() {
                    tracing::warn!("history flush failed: {e}");
                }
            }
        })
    }

    pub fn flush(&self) -> StowResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = {
            let entries = self.entries.read().expect("history lock poisoned");
            serde_json::to_vec_pretty(&*entries).expect("history serializes")
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn list(&self) -> Vec<FileDataLog> {
        self.entries.read().expect("history lock poisoned").clone()
    }

    /// Record an upload. An entry for the same blob in the same category is
    /// replaced; beyond the cap the oldest entry is dropped.
    pub fn add(&self, entry: FileDataLog) {
        {
            let mut entries = self.entries.write().expect("history lock poisoned");
            entries.retain(|e| *e != entry);
            if entries.len() >= HISTORY_LIMIT {
                entries.remove(0);
            }
            entries.push(entry);
        }
        self.dirty.notify_one();
    }

    /// Remove every entry for this share code. Returns how many went away.
    pub fn remove(&self, share_code: &str) -> usize {
        let removed = {
            let mut entries = self.entries.write().expect("history lock poisoned");
            let before = entries.len();
            entries.retain(|e| e.share_code != share_code);
            before - entries.len()
        };
        if removed > 0 {
            self.dirty.notify_one();
        }
        removed
    }

    /// Re-derive the entry's descriptor under a new file name. The stored
    /// entry is updated in place; the returned share code points at the same
    /// remote chunks under the new name.
    pub fn rename(&self, share_code: &str, new_name: &str) -> StowResult<String> {
        if new_name.trim().is_empty() {
            return Err(StowError::MalformedDescriptor("empty file name".into()));
        }

        let descriptor = stow_share::resolve(share_code)?;
        let renamed = descriptor.renamed(new_name.trim());
        let new_code = stow_share::encode(&renamed);

        let mut entries = self.entries.write().expect("history lock poisoned");
        let mut touched = false;
        for entry in entries.iter_mut().filter(|e| e.share_code == share_code) {
            entry.share_code = new_code.clone();
            entry.name = new_name.trim().to_string();
            touched = true;
        }
        drop(entries);

        if !touched {
            return Err(StowError::NotFound("no history entry for that code".into()));
        }
        self.dirty.notify_one();
        Ok(new_code)
    }

    pub fn make_entry(share_code: String, name: String, size: u64) -> FileDataLog {
        FileDataLog {
            share_code,
            name,
            size,
            time: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            category: DEFAULT_CATEGORY.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stow_crypto::{FileKey, KEY_SIZE};
    use stow_share::ShareDescriptor;

    fn entry(code: &str) -> FileDataLog {
        HistoryStore::make_entry(code.into(), "f.bin".into(), 10)
    }

    #[test]
    fn add_and_list() {
        let store = HistoryStore::in_memory();
        store.add(entry("stow://a"));
        store.add(entry("stow://b"));
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn same_code_same_category_replaces() {
        let store = HistoryStore::in_memory();
        store.add(entry("stow://a"));
        store.add(entry("stow://a"));
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn cap_drops_the_oldest() {
        let store = HistoryStore::in_memory();
        for i in 0..HISTORY_LIMIT + 5 {
            store.add(entry(&format!("stow://{i}")));
        }
        let entries = store.list();
        assert_eq!(entries.len(), HISTORY_LIMIT);
        assert_eq!(entries[0].share_code, "stow://5");
    }

    #[test]
    fn remove_by_code() {
        let store = HistoryStore::in_memory();
        store.add(entry("stow://a"));
        store.add(entry("stow://b"));
        assert_eq!(store.remove("stow://a"), 1);
        assert_eq!(store.remove("stow://a"), 0);
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn rename_rederives_the_descriptor() {
        let descriptor = ShareDescriptor {
            version: ShareDescriptor::VERSION,
            file_name: "old.bin".into(),
            file_size: 10,
            chunk_size: 1_048_576,
            key: FileKey::from_bytes([5u8; KEY_SIZE]),
            backend: "line-a".into(),
            referer: None,
            chunks: vec![],
        };
        let code = stow_share::encode(&descriptor);

        let store = HistoryStore::in_memory();
        store.add(HistoryStore::make_entry(code.clone(), "old.bin".into(), 10));

        let new_code = store.rename(&code, "new.bin").unwrap();
        assert_ne!(new_code, code);

        let renamed = stow_share::decode(&new_code).unwrap();
        assert_eq!(renamed.file_name, "new.bin");
        assert_eq!(renamed.key, descriptor.key, "same key, same chunks");

        // The old descriptor still decodes — renames never invalidate it
        assert_eq!(stow_share::decode(&code).unwrap().file_name, "old.bin");

        let entries = store.list();
        assert_eq!(entries[0].name, "new.bin");
        assert_eq!(entries[0].share_code, new_code);
    }

    #[test]
    fn rename_unknown_code_is_not_found() {
        let descriptor = ShareDescriptor {
            version: ShareDescriptor::VERSION,
            file_name: "x".into(),
            file_size: 1,
            chunk_size: 1_048_576,
            key: FileKey::from_bytes([6u8; KEY_SIZE]),
            backend: "line-a".into(),
            referer: None,
            chunks: vec![],
        };
        let code = stow_share::encode(&descriptor);
        let store = HistoryStore::in_memory();
        assert!(matches!(
            store.rename(&code, "y"),
            Err(StowError::NotFound(_))
        ));
    }

    #[test]
    fn persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let store = HistoryStore::open(&path);
        store.add(entry("stow://persisted"));
        store.flush().unwrap();

        let reopened = HistoryStore::open(&path);
        assert_eq!(reopened.list().len(), 1);
        assert_eq!(reopened.list()[0].share_code, "stow://persisted");
    }
}
