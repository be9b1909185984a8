//! Runtime-mutable settings backed by a JSON file.
//!
//! The store is a flat key→value map with typed accessors for the keys the
//! engine and gateway care about. Writes are debounced: `set` marks the store
//! dirty and a single background flush task coalesces bursts into one atomic
//! (tmp + rename) disk write. `flush()` forces the final state out, so a
//! clean shutdown never loses the last mutation.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::{watch, Notify};

use crate::error::StowResult;

/// Debounce window for background flushes.
const FLUSH_DEBOUNCE_MS: u64 = 200;

pub const DEFAULT_CHUNK_SIZE_KB: u64 = 1024;
pub const MIN_CHUNK_SIZE_KB: u64 = 1;
pub const MAX_CHUNK_SIZE_KB: u64 = 20 * 1024;

pub const DEFAULT_UPLOAD_TASK_COUNT: u64 = 10;
pub const DEFAULT_DOWNLOAD_TASK_COUNT: u64 = 5;
pub const DEFAULT_UPLOAD_RETRY_COUNT: u64 = 10;

pub struct SettingsStore {
    path: Option<PathBuf>,
    values: RwLock<Map<String, Value>>,
    dirty: Notify,
    changed: watch::Sender<u64>,
}

impl SettingsStore {
    /// Load settings from `path`, starting empty if the file is absent or
    /// unreadable.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Map<String, Value>>(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "settings parse failed: {e} (starting empty)");
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };
        Self::with_values(Some(path), values)
    }

    /// An in-memory store that never touches disk. Used by tests and
    /// embedding callers that manage persistence themselves.
    pub fn in_memory() -> Self {
        Self::with_values(None, Map::new())
    }

    fn with_values(path: Option<PathBuf>, values: Map<String, Value>) -> Self {
        let (changed, _) = watch::channel(0u64);
        Self {
            path,
            values: RwLock::new(values),
            dirty: Notify::new(),
            changed,
        }
    }

    /// Change notification: the receiver's value bumps on every `set`.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    /// Background flush task. Coalesces bursts of writes; the last write
    /// always lands within the debounce window.
    pub fn spawn_flusher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                store.dirty.notified().await;
                tokio::time::sleep(std::time::Duration::from_millis(FLUSH_DEBOUNCE_MS)).await;
                if let Err(e) = store.flush() {
                    tracing::warn!("settings flush failed: {e}");
                }
            }
        })
    }

    /// Write the current state to disk immediately (tmp + rename).
    pub fn flush(&self) -> StowResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = {
            let values = self.values.read().expect("settings lock poisoned");
            serde_json::to_vec_pretty(&*values).expect("settings map serializes")
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    // ── Generic accessors ─────────────────────────────────────────────────

    pub fn get_str(&self, key: &str, default: &str) -> String {
        let values = self.values.read().expect("settings lock poisoned");
        values
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_string()
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        let values = self.values.read().expect("settings lock poisoned");
        values.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        let values = self.values.read().expect("settings lock poisoned");
        values.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        {
            let mut values = self.values.write().expect("settings lock poisoned");
            values.insert(key.to_string(), value.into());
        }
        self.dirty.notify_one();
        self.changed.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    // ── Typed accessors ───────────────────────────────────────────────────

    /// Chunk size in KB, clamped to [1, 20480].
    pub fn chunk_size_kb(&self) -> u64 {
        self.get_u64("chunk_size_kb", DEFAULT_CHUNK_SIZE_KB)
            .clamp(MIN_CHUNK_SIZE_KB, MAX_CHUNK_SIZE_KB)
    }

    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_kb() * 1024
    }

    pub fn upload_task_count(&self) -> u64 {
        self.get_u64("upload_task_count", DEFAULT_UPLOAD_TASK_COUNT).max(1)
    }

    pub fn download_task_count(&self) -> u64 {
        self.get_u64("download_task_count", DEFAULT_DOWNLOAD_TASK_COUNT).max(1)
    }

    /// Per-chunk upload attempt budget.
    pub fn upload_retry_count(&self) -> u64 {
        self.get_u64("upload_retry_count", DEFAULT_UPLOAD_RETRY_COUNT).max(1)
    }

    /// Gateway password; empty disables access control.
    pub fn access_password(&self) -> String {
        self.get_str("access_password", "").trim().to_string()
    }

    /// Identifier of the active upload backend.
    pub fn uploader(&self) -> String {
        self.get_str("uploader", "line-a")
    }

    pub fn custom_upload_url(&self) -> String {
        self.get_str("custom_upload_url", "")
    }

    pub fn custom_referer(&self) -> String {
        self.get_str("custom_referer", "")
    }

    pub fn set_custom_referer(&self, referer: &str) {
        self.set("custom_referer", referer.trim());
    }

    /// Source for the script-driven backend.
    pub fn script_source(&self) -> String {
        self.get_str("script_source", "")
    }

    /// Emit share codes hidden in cover text rather than as raw strings.
    pub fn use_short_code(&self) -> bool {
        self.get_bool("use_short_code", true)
    }

    pub fn auto_add_history(&self) -> bool {
        self.get_bool("auto_add_history", true)
    }
}
