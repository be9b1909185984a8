//! Upload and download workers
//!
//! Upload: encrypt → pack with filler → PUT, one task per chunk under the
//! upload limit, retrying retryable failures up to the configured budget.
//! A failed chunk cancels its siblings and fails the whole file — a
//! descriptor is only ever assembled from a complete upload.
//!
//! Download: fetch → unpack → decrypt, one task per chunk under the download
//! limit. Chunks complete in any order and are re-sequenced by index before
//! being yielded, so the output stream is always in file order.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stow_backend::Uploader;
use stow_core::{SettingsStore, StowError, StowResult};
use stow_crypto::FileKey;
use stow_share::{ChunkLocation, ShareDescriptor};

use crate::limit::{weight_for, TransferLimit};
use crate::plan::{ChunkPlan, ChunkRange};
use crate::task::{TaskHandle, TaskState, TransferStats};

/// Completed transfers kept in the task registry for status queries.
const TASK_HISTORY_LIMIT: usize = 100;

pub struct TransferEngine {
    settings: Arc<SettingsStore>,
    upload_limit: Arc<TransferLimit>,
    download_limit: Arc<TransferLimit>,
    stats: Arc<TransferStats>,
    tasks: Mutex<Vec<Arc<TaskHandle>>>,
}

impl TransferEngine {
    /// Build an engine bound to a settings store. Limit widths track the
    /// store: edits to the task counts apply to new acquisitions while
    /// in-flight chunks finish under the old width.
    pub fn new(settings: Arc<SettingsStore>) -> Arc<Self> {
        let upload_limit = TransferLimit::new(settings.upload_task_count());
        let download_limit = TransferLimit::new(settings.download_task_count());
        let engine = Arc::new(Self {
            settings,
            upload_limit,
            download_limit,
            stats: Arc::new(TransferStats::default()),
            tasks: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&engine);
        let mut changes = engine.settings.subscribe();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let Some(engine) = weak.upgrade() else { break };
                engine
                    .upload_limit
                    .set_width(engine.settings.upload_task_count());
                engine
                    .download_limit
                    .set_width(engine.settings.download_task_count());
            }
        });

        engine
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn upload_in_flight(&self) -> u64 {
        self.upload_limit.in_flight()
    }

    pub fn download_in_flight(&self) -> u64 {
        self.download_limit.in_flight()
    }

    /// Snapshot of recent and active transfers.
    pub fn tasks(&self) -> Vec<Arc<TaskHandle>> {
        self.tasks.lock().expect("task registry poisoned").clone()
    }

    fn register(&self, task: &Arc<TaskHandle>) {
        let mut tasks = self.tasks.lock().expect("task registry poisoned");
        if tasks.len() >= TASK_HISTORY_LIMIT {
            // Drop the oldest finished entry to make room
            if let Some(pos) = tasks.iter().position(|t| t.state().is_terminal()) {
                tasks.remove(pos);
            } else {
                tasks.remove(0);
            }
        }
        tasks.push(task.clone());
    }

    // ── Upload ────────────────────────────────────────────────────────────

    pub async fn upload(
        self: &Arc<Self>,
        backend: Arc<dyn Uploader>,
        file_name: &str,
        data: Bytes,
    ) -> StowResult<ShareDescriptor> {
        let task = TaskHandle::new(format!("upload {file_name}"));
        self.register(&task);
        self.upload_with_task(backend, file_name, data, &task).await
    }

    pub async fn upload_with_task(
        self: &Arc<Self>,
        backend: Arc<dyn Uploader>,
        file_name: &str,
        data: Bytes,
        task: &Arc<TaskHandle>,
    ) -> StowResult<ShareDescriptor> {
        let cancel = task.cancel_token();
        if cancel.is_cancelled() {
            task.set_state(TaskState::Cancelled);
            return Err(StowError::Cancelled);
        }

        let plan = ChunkPlan::new(data.len() as u64, self.settings.chunk_size_bytes());
        let retry_budget = self.settings.upload_retry_count();
        let filler = match backend.filler().await {
            Ok(filler) => Arc::new(filler),
            Err(e) => {
                task.set_state(TaskState::Failed(e.to_string()));
                return Err(e);
            }
        };
        let key = FileKey::generate();

        task.set_state(TaskState::Running);
        debug!(
            file = file_name,
            size = data.len(),
            chunks = plan.chunk_count(),
            backend = backend.id(),
            "upload starting"
        );

        let mut join: JoinSet<StowResult<(u64, ChunkLocation)>> = JoinSet::new();
        for range in plan.iter() {
            let chunk = data.slice(range.offset as usize..(range.offset + range.len) as usize);
            join.spawn(upload_chunk_job(
                backend.clone(),
                filler.clone(),
                key.clone(),
                self.upload_limit.clone(),
                cancel.clone(),
                self.stats.clone(),
                task.clone(),
                range,
                chunk,
                retry_budget,
            ));
        }

        let mut locations: Vec<Option<ChunkLocation>> = vec![None; plan.chunk_count() as usize];
        let mut failure: Option<StowError> = None;
        while let Some(joined) = join.join_next().await {
            match flatten_join(joined) {
                Ok((index, location)) => locations[index as usize] = Some(location),
                Err(e) => {
                    cancel.cancel();
                    join.abort_all();
                    failure = Some(e);
                    break;
                }
            }
        }
        // Let aborted siblings finish dropping their permits
        while join.join_next().await.is_some() {}

        if let Some(e) = failure {
            match &e {
                StowError::Cancelled => task.set_state(TaskState::Cancelled),
                other => task.set_state(TaskState::Failed(other.to_string())),
            }
            warn!(file = file_name, "upload failed: {e}");
            return Err(e);
        }

        let chunks = locations
            .into_iter()
            .map(|l| l.expect("every chunk job completed"))
            .collect();

        let descriptor = ShareDescriptor {
            version: ShareDescriptor::VERSION,
            file_name: file_name.to_string(),
            file_size: data.len() as u64,
            chunk_size: plan.chunk_size(),
            key,
            backend: backend.id().to_string(),
            referer: backend.referer(),
            chunks,
        };

        task.set_state(TaskState::Done);
        info!(
            file = file_name,
            size = descriptor.file_size,
            chunks = descriptor.chunk_count(),
            backend = backend.id(),
            "uploaded"
        );
        Ok(descriptor)
    }

    // ── Download ──────────────────────────────────────────────────────────

    /// Stream a file's plaintext in chunk-index order. Dropping the stream
    /// cancels the remaining chunk work.
    pub fn download_stream(
        self: &Arc<Self>,
        backend: Arc<dyn Uploader>,
        descriptor: ShareDescriptor,
    ) -> (Arc<TaskHandle>, ReceiverStream<StowResult<Bytes>>) {
        let task = TaskHandle::new(format!("download {}", descriptor.file_name));
        self.register(&task);
        let stream = self.download_stream_with_task(backend, descriptor, &task);
        (task, stream)
    }

    pub fn download_stream_with_task(
        self: &Arc<Self>,
        backend: Arc<dyn Uploader>,
        descriptor: ShareDescriptor,
        task: &Arc<TaskHandle>,
    ) -> ReceiverStream<StowResult<Bytes>> {
        let (tx, rx) = mpsc::channel::<StowResult<Bytes>>(8);
        let engine = self.clone();
        let task = task.clone();
        tokio::spawn(async move {
            engine.run_download(backend, descriptor, task, tx).await;
        });
        ReceiverStream::new(rx)
    }

    /// Download a whole file into memory. Used for archives and file lists,
    /// which are small by construction.
    pub async fn download(
        self: &Arc<Self>,
        backend: Arc<dyn Uploader>,
        descriptor: &ShareDescriptor,
    ) -> StowResult<Vec<u8>> {
        use futures::StreamExt;

        let (_task, mut stream) = self.download_stream(backend, descriptor.clone());
        let mut out = Vec::with_capacity(descriptor.file_size as usize);
        while let Some(item) = stream.next().await {
            out.extend_from_slice(&item?);
        }
        Ok(out)
    }

    async fn run_download(
        self: Arc<Self>,
        backend: Arc<dyn Uploader>,
        descriptor: ShareDescriptor,
        task: Arc<TaskHandle>,
        tx: mpsc::Sender<StowResult<Bytes>>,
    ) {
        let cancel = task.cancel_token();
        if cancel.is_cancelled() {
            task.set_state(TaskState::Cancelled);
            let _ = tx.send(Err(StowError::Cancelled)).await;
            return;
        }

        let plan = ChunkPlan::new(descriptor.file_size, descriptor.chunk_size);
        if descriptor.chunks.len() as u64 != plan.chunk_count() {
            let e = StowError::MalformedDescriptor(format!(
                "descriptor lists {} chunks, layout implies {}",
                descriptor.chunks.len(),
                plan.chunk_count()
            ));
            task.set_state(TaskState::Failed(e.to_string()));
            let _ = tx.send(Err(e)).await;
            return;
        }

        task.set_state(TaskState::Running);
        debug!(
            file = %descriptor.file_name,
            size = descriptor.file_size,
            chunks = descriptor.chunk_count(),
            "download starting"
        );

        let mut join: JoinSet<StowResult<(u64, Bytes)>> = JoinSet::new();
        for (range, location) in plan.iter().zip(descriptor.chunks.iter().cloned()) {
            join.spawn(fetch_chunk_job(
                backend.clone(),
                descriptor.key.clone(),
                descriptor.referer.clone(),
                self.download_limit.clone(),
                cancel.clone(),
                self.stats.clone(),
                task.clone(),
                range,
                location,
            ));
        }

        let mut buffer: BTreeMap<u64, Bytes> = BTreeMap::new();
        let mut next_index = 0u64;
        let mut failure: Option<StowError> = None;

        while let Some(joined) = join.join_next().await {
            match flatten_join(joined) {
                Ok((index, bytes)) => {
                    buffer.insert(index, bytes);
                    while let Some(bytes) = buffer.remove(&next_index) {
                        if tx.send(Ok(bytes)).await.is_err() {
                            // Reader went away — treat like a cancellation.
                            cancel.cancel();
                            join.abort_all();
                            while join.join_next().await.is_some() {}
                            task.set_state(TaskState::Cancelled);
                            return;
                        }
                        next_index += 1;
                    }
                }
                Err(e) => {
                    cancel.cancel();
                    join.abort_all();
                    failure = Some(e);
                    break;
                }
            }
        }
        while join.join_next().await.is_some() {}

        if let Some(e) = failure {
            match &e {
                StowError::Cancelled => task.set_state(TaskState::Cancelled),
                other => task.set_state(TaskState::Failed(other.to_string())),
            }
            warn!(file = %descriptor.file_name, "download failed: {e}");
            let _ = tx.send(Err(e)).await;
            return;
        }

        task.set_state(TaskState::Done);
        debug!(file = %descriptor.file_name, "download complete");
    }
}

#[allow(clippy::too_many_arguments)]
async fn upload_chunk_job(
    backend: Arc<dyn Uploader>,
    filler: Arc<Vec<u8>>,
    key: FileKey,
    limit: Arc<TransferLimit>,
    cancel: CancellationToken,
    stats: Arc<TransferStats>,
    task: Arc<TaskHandle>,
    range: ChunkRange,
    chunk: Bytes,
    retry_budget: u64,
) -> StowResult<(u64, ChunkLocation)> {
    let _permit = tokio::select! {
        _ = cancel.cancelled() => return Err(StowError::Cancelled),
        permit = limit.acquire(weight_for(range.len)) => permit,
    };

    let ciphertext = stow_crypto::encrypt_chunk(&key, range.index, &chunk);
    let (blob, head) = stow_crypto::pack(&filler, &ciphertext);

    let mut attempt = 0u64;
    loop {
        attempt += 1;
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(StowError::Cancelled),
            r = backend.upload_chunk(&blob) => r,
        };
        match result {
            Ok(url) => {
                stats.add_uploaded(blob.len() as u64);
                task.add_bytes(range.len);
                return Ok((range.index, ChunkLocation { url, head }));
            }
            Err(e) if e.is_retryable() && attempt < retry_budget => {
                warn!(chunk = range.index, attempt, "retrying chunk upload: {e}");
            }
            Err(e) if e.is_retryable() => {
                return Err(StowError::upload(
                    format!("chunk {} failed after {attempt} attempts: {e}", range.index),
                    false,
                ));
            }
            Err(e) => return Err(e),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn fetch_chunk_job(
    backend: Arc<dyn Uploader>,
    key: FileKey,
    referer: Option<String>,
    limit: Arc<TransferLimit>,
    cancel: CancellationToken,
    stats: Arc<TransferStats>,
    task: Arc<TaskHandle>,
    range: ChunkRange,
    location: ChunkLocation,
) -> StowResult<(u64, Bytes)> {
    let _permit = tokio::select! {
        _ = cancel.cancelled() => return Err(StowError::Cancelled),
        permit = limit.acquire(weight_for(range.len)) => permit,
    };

    let blob = tokio::select! {
        _ = cancel.cancelled() => return Err(StowError::Cancelled),
        r = backend.fetch_chunk(&location.url, referer.as_deref()) => r?,
    };

    let ciphertext = stow_crypto::unpack(&blob, location.head)?;
    let plaintext = stow_crypto::decrypt_chunk(&key, range.index, ciphertext)?;
    if plaintext.len() as u64 != range.len {
        return Err(StowError::Integrity);
    }

    stats.add_downloaded(blob.len() as u64);
    task.add_bytes(range.len);
    Ok((range.index, Bytes::from(plaintext)))
}

/// Collapse a JoinSet result: task panics and aborts become errors of the
/// whole transfer.
fn flatten_join<T>(joined: Result<StowResult<T>, tokio::task::JoinError>) -> StowResult<T> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(StowError::Cancelled),
        Err(e) => Err(StowError::Other(anyhow::anyhow!("chunk task panicked: {e}"))),
    }
}
