//! Per-transfer progress tracking and global byte counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one transfer. Terminal states are never overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Done,
    Failed(String),
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed(_) | TaskState::Cancelled)
    }
}

/// Handle to one upload or download: state, bytes moved so far, and
/// cooperative cancellation. Cancelling a queued task prevents it from ever
/// starting; cancelling a running one stops further chunk scheduling.
pub struct TaskHandle {
    name: String,
    state: watch::Sender<TaskState>,
    bytes: AtomicU64,
    cancel: CancellationToken,
}

impl TaskHandle {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let (state, _) = watch::channel(TaskState::Queued);
        Arc::new(Self {
            name: name.into(),
            state,
            bytes: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    /// Bytes transferred so far; monotonically increasing.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn add_bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn set_state(&self, next: TaskState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// Global byte counters, bumped on every chunk in both directions.
#[derive(Default)]
pub struct TransferStats {
    uploaded: AtomicU64,
    downloaded: AtomicU64,
}

impl TransferStats {
    pub fn add_uploaded(&self, n: u64) {
        self.uploaded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_downloaded(&self, n: u64) {
        self.downloaded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_progression() {
        let task = TaskHandle::new("upload foo.bin");
        assert_eq!(task.state(), TaskState::Queued);

        task.set_state(TaskState::Running);
        assert_eq!(task.state(), TaskState::Running);

        task.set_state(TaskState::Done);
        assert_eq!(task.state(), TaskState::Done);
    }

    #[test]
    fn terminal_state_is_sticky() {
        let task = TaskHandle::new("t");
        task.set_state(TaskState::Cancelled);
        task.set_state(TaskState::Running);
        assert_eq!(task.state(), TaskState::Cancelled);

        let task = TaskHandle::new("t");
        task.set_state(TaskState::Failed("boom".into()));
        task.set_state(TaskState::Done);
        assert_eq!(task.state(), TaskState::Failed("boom".into()));
    }

    #[test]
    fn bytes_accumulate() {
        let task = TaskHandle::new("t");
        task.add_bytes(100);
        task.add_bytes(50);
        assert_eq!(task.bytes_transferred(), 150);
    }

    #[tokio::test]
    async fn watch_observes_transitions() {
        let task = TaskHandle::new("t");
        let mut rx = task.subscribe();

        task.set_state(TaskState::Running);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), TaskState::Running);
    }

    #[test]
    fn stats_count_both_directions() {
        let stats = TransferStats::default();
        stats.add_uploaded(10);
        stats.add_downloaded(20);
        stats.add_downloaded(5);
        assert_eq!(stats.uploaded(), 10);
        assert_eq!(stats.downloaded(), 25);
    }
}
