//! End-to-end engine scenarios against an in-memory blob host.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;

use stow_backend::Uploader;
use stow_core::{SettingsStore, StowError, StowResult};
use stow_transfer::{TaskHandle, TaskState, TransferEngine};

const FILLER: &[u8] = b"GIF89a-mock-filler";

/// An in-process blob host with fault injection knobs.
#[derive(Default)]
struct MemoryHost {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    next_id: AtomicU64,
    upload_calls: AtomicU64,
    /// Number of upload attempts to fail with a retryable error first.
    fail_retryable: AtomicI64,
    /// Locations whose fetch hangs until cancelled.
    slow_locations: Mutex<HashSet<String>>,
    /// Artificial latency per operation, for concurrency measurements.
    op_delay: Mutex<Option<Duration>>,
    concurrent: AtomicU64,
    peak: AtomicU64,
}

struct ConcurrencyGuard<'a>(&'a MemoryHost);

impl MemoryHost {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(&self) -> ConcurrencyGuard<'_> {
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ConcurrencyGuard(self)
    }

    fn peak_concurrency(&self) -> u64 {
        self.peak.load(Ordering::SeqCst)
    }

    async fn maybe_delay(&self) {
        let delay = *self.op_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn tamper(&self, location: &str, byte_offset_from_end: usize) {
        let mut blobs = self.blobs.lock().unwrap();
        let blob = blobs.get_mut(location).expect("blob stored");
        let len = blob.len();
        blob[len - 1 - byte_offset_from_end] ^= 0xFF;
    }

    fn truncate(&self, location: &str, keep: usize) {
        let mut blobs = self.blobs.lock().unwrap();
        blobs.get_mut(location).expect("blob stored").truncate(keep);
    }
}

#[async_trait::async_trait]
impl Uploader for MemoryHost {
    fn id(&self) -> &str {
        "memory"
    }

    async fn upload_chunk(&self, blob: &[u8]) -> StowResult<String> {
        let _guard = self.enter();
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_delay().await;

        if self.fail_retryable.fetch_sub(1, Ordering::SeqCst) > 0 {
            return Err(StowError::upload("status 500", true));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let location = format!("mem://{id}");
        self.blobs
            .lock()
            .unwrap()
            .insert(location.clone(), blob.to_vec());
        Ok(location)
    }

    async fn fetch_chunk(&self, location: &str, _referer: Option<&str>) -> StowResult<Vec<u8>> {
        let _guard = self.enter();
        if self.slow_locations.lock().unwrap().contains(location) {
            // Hangs until the fetch future is dropped by cancellation
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.maybe_delay().await;

        self.blobs
            .lock()
            .unwrap()
            .get(location)
            .cloned()
            .ok_or_else(|| StowError::Fetch(format!("no blob at {location}")))
    }

    async fn filler(&self) -> StowResult<Vec<u8>> {
        Ok(FILLER.to_vec())
    }
}

impl Drop for ConcurrencyGuard<'_> {
    fn drop(&mut self) {
        self.0.concurrent.fetch_sub(1, Ordering::SeqCst);
    }
}

fn engine_with(settings_edits: &[(&str, u64)]) -> (Arc<TransferEngine>, Arc<SettingsStore>) {
    let settings = Arc::new(SettingsStore::in_memory());
    for (key, value) in settings_edits {
        settings.set(key, *value);
    }
    (TransferEngine::new(settings.clone()), settings)
}

fn patterned_data(len: usize) -> Bytes {
    let data: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
    Bytes::from(data)
}

#[tokio::test]
async fn upload_download_roundtrip_2_5_mib() {
    let (engine, _) = engine_with(&[("chunk_size_kb", 1024)]);
    let host = MemoryHost::new();
    let data = patterned_data(2_621_440); // 2.5 MiB

    let descriptor = engine
        .upload(host.clone(), "big.bin", data.clone())
        .await
        .unwrap();

    assert_eq!(descriptor.file_size, 2_621_440);
    assert_eq!(descriptor.chunk_size, 1_048_576);
    assert_eq!(descriptor.chunk_count(), 3);
    assert!(descriptor.chunks.iter().all(|c| c.head == FILLER.len() as u32));

    // The descriptor survives its own wire form
    let code = stow_share::encode(&descriptor);
    let decoded = stow_share::decode(&code).unwrap();
    assert_eq!(decoded, descriptor);

    let downloaded = engine.download(host.clone(), &descriptor).await.unwrap();
    assert_eq!(Bytes::from(downloaded), data);

    // Both byte counters moved
    assert!(engine.stats().uploaded() > data.len() as u64, "counts blob bytes");
    assert!(engine.stats().downloaded() > data.len() as u64);
    assert_eq!(engine.upload_in_flight(), 0);
    assert_eq!(engine.download_in_flight(), 0);
}

#[tokio::test]
async fn empty_file_roundtrip() {
    let (engine, _) = engine_with(&[]);
    let host = MemoryHost::new();

    let descriptor = engine
        .upload(host.clone(), "empty.txt", Bytes::new())
        .await
        .unwrap();
    assert_eq!(descriptor.chunk_count(), 0);

    let downloaded = engine.download(host, &descriptor).await.unwrap();
    assert!(downloaded.is_empty());
}

#[tokio::test]
async fn stream_is_in_chunk_order_despite_out_of_order_completion() {
    let (engine, _) = engine_with(&[("chunk_size_kb", 1), ("download_task_count", 8)]);
    let host = MemoryHost::new();
    *host.op_delay.lock().unwrap() = Some(Duration::from_millis(2));

    let data = patterned_data(16 * 1024 + 123);
    let descriptor = engine
        .upload(host.clone(), "ordered.bin", data.clone())
        .await
        .unwrap();

    let (_task, mut stream) = engine.download_stream(host, descriptor);
    let mut out = Vec::new();
    while let Some(item) = stream.next().await {
        out.extend_from_slice(&item.unwrap());
    }
    assert_eq!(Bytes::from(out), data, "reassembly must follow chunk index order");
}

#[tokio::test]
async fn retry_bound_three_survives_two_500s() {
    let (engine, _) = engine_with(&[("upload_retry_count", 3)]);
    let host = MemoryHost::new();
    host.fail_retryable.store(2, Ordering::SeqCst);

    let descriptor = engine
        .upload(host.clone(), "small.bin", patterned_data(100))
        .await
        .unwrap();
    assert_eq!(descriptor.chunk_count(), 1);
    assert_eq!(host.upload_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_bound_one_exhausts_and_fails() {
    let (engine, _) = engine_with(&[("upload_retry_count", 1)]);
    let host = MemoryHost::new();
    host.fail_retryable.store(2, Ordering::SeqCst);

    let err = engine
        .upload(host.clone(), "small.bin", patterned_data(100))
        .await
        .unwrap_err();
    assert!(
        matches!(err, StowError::Upload { retryable: false, .. }),
        "exhausted retries surface as non-retryable, got {err:?}"
    );
    assert_eq!(host.upload_calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.upload_in_flight(), 0);
}

#[tokio::test]
async fn download_concurrency_stays_under_width() {
    let (engine, _) = engine_with(&[("chunk_size_kb", 1), ("download_task_count", 2)]);
    let host = MemoryHost::new();

    let data = patterned_data(12 * 1024);
    let descriptor = engine
        .upload(host.clone(), "c.bin", data.clone())
        .await
        .unwrap();
    assert_eq!(descriptor.chunk_count(), 12);

    // Reset the peak recorded during upload, then measure downloads only
    host.peak.store(0, Ordering::SeqCst);
    *host.op_delay.lock().unwrap() = Some(Duration::from_millis(10));

    let downloaded = engine.download(host.clone(), &descriptor).await.unwrap();
    assert_eq!(Bytes::from(downloaded), data);
    assert!(
        host.peak_concurrency() <= 2,
        "peak fetch concurrency {} exceeded width 2",
        host.peak_concurrency()
    );
}

#[tokio::test]
async fn cancel_mid_download_yields_cancelled_and_leaks_nothing() {
    let (engine, _) = engine_with(&[("chunk_size_kb", 1), ("download_task_count", 8)]);
    let host = MemoryHost::new();

    let data = patterned_data(5 * 1024);
    let descriptor = engine
        .upload(host.clone(), "c.bin", data.clone())
        .await
        .unwrap();
    assert_eq!(descriptor.chunk_count(), 5);

    // Every chunk except the first hangs until cancelled
    {
        let mut slow = host.slow_locations.lock().unwrap();
        for location in descriptor.chunks.iter().skip(1) {
            slow.insert(location.url.clone());
        }
    }

    let (task, mut stream) = engine.download_stream(host.clone(), descriptor);

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 1024);

    task.cancel();

    let next = stream.next().await.unwrap();
    assert!(matches!(next, Err(StowError::Cancelled)), "got {next:?}");
    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(engine.download_in_flight(), 0, "no leaked permits");
}

#[tokio::test]
async fn cancel_before_start_never_touches_the_backend() {
    let (engine, _) = engine_with(&[]);
    let host = MemoryHost::new();

    let task = TaskHandle::new("queued upload");
    task.cancel();

    let err = engine
        .upload_with_task(host.clone(), "never.bin", patterned_data(100), &task)
        .await
        .unwrap_err();
    assert!(matches!(err, StowError::Cancelled));
    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(host.upload_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn tampered_blob_fails_with_integrity() {
    let (engine, _) = engine_with(&[]);
    let host = MemoryHost::new();

    let descriptor = engine
        .upload(host.clone(), "t.bin", patterned_data(2048))
        .await
        .unwrap();

    // Flip a byte inside the ciphertext region of the stored blob
    host.tamper(&descriptor.chunks[0].url, 0);

    let err = engine.download(host, &descriptor).await.unwrap_err();
    assert!(matches!(err, StowError::Integrity), "got {err:?}");
}

#[tokio::test]
async fn truncated_blob_fails_with_corrupt_blob() {
    let (engine, _) = engine_with(&[]);
    let host = MemoryHost::new();

    let descriptor = engine
        .upload(host.clone(), "t.bin", patterned_data(2048))
        .await
        .unwrap();

    // Shorter than the recorded head size
    host.truncate(&descriptor.chunks[0].url, FILLER.len() - 3);

    let err = engine.download(host, &descriptor).await.unwrap_err();
    assert!(matches!(err, StowError::CorruptBlob { .. }), "got {err:?}");
}

#[tokio::test]
async fn missing_blob_fails_with_fetch_error() {
    let (engine, _) = engine_with(&[]);
    let host = MemoryHost::new();

    let mut descriptor = engine
        .upload(host.clone(), "t.bin", patterned_data(100))
        .await
        .unwrap();
    descriptor.chunks[0].url = "mem://withdrawn".into();

    let err = engine.download(host, &descriptor).await.unwrap_err();
    assert!(matches!(err, StowError::Fetch(_)), "got {err:?}");
}

#[tokio::test]
async fn task_registry_tracks_transfers() {
    let (engine, _) = engine_with(&[]);
    let host = MemoryHost::new();

    engine
        .upload(host.clone(), "tracked.bin", patterned_data(100))
        .await
        .unwrap();

    let tasks = engine.tasks();
    assert!(tasks.iter().any(|t| {
        t.name() == "upload tracked.bin"
            && t.state() == TaskState::Done
            && t.bytes_transferred() == 100
    }));
}
