//! Completion counters for a dispatched batch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Called after each chunk finishes with `(finished, total)`.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Shared counters updated by dispatch tasks.
///
/// Counts only grow; `finished()` reaches `total()` when every chunk has
/// either returned a result or exhausted its retries.
#[derive(Clone)]
pub struct DispatchProgress {
    total: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    retries: Arc<AtomicUsize>,
    callback: Option<ProgressCallback>,
}

impl std::fmt::Debug for DispatchProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchProgress")
            .field("total", &self.total())
            .field("completed", &self.completed())
            .field("failed", &self.failed())
            .field("retries", &self.retries())
            .finish()
    }
}

impl Default for DispatchProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchProgress {
    pub fn new() -> Self {
        Self {
            total: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
            retries: Arc::new(AtomicUsize::new(0)),
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Chunks that returned a result.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Chunks that exhausted their retries.
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Retry attempts made across all chunks.
    pub fn retries(&self) -> usize {
        self.retries.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.completed() + self.failed()
    }

    pub(crate) fn add_submitted(&self, count: usize) {
        self.total.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn mark_retry(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn mark_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.notify();
    }

    pub(crate) fn mark_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.notify();
    }

    fn notify(&self) {
        if let Some(callback) = &self.callback {
            callback(self.finished(), self.total());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counts() {
        let progress = DispatchProgress::new();
        progress.add_submitted(3);
        progress.mark_completed();
        progress.mark_retry();
        progress.mark_failed();

        assert_eq!(progress.total(), 3);
        assert_eq!(progress.completed(), 1);
        assert_eq!(progress.failed(), 1);
        assert_eq!(progress.retries(), 1);
        assert_eq!(progress.finished(), 2);
    }

    #[test]
    fn test_clones_share_counters() {
        let progress = DispatchProgress::new();
        let clone = progress.clone();
        clone.mark_completed();
        assert_eq!(progress.completed(), 1);
    }

    #[test]
    fn test_callback_sees_running_count() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress = DispatchProgress::new()
            .with_callback(Arc::new(move |done, total| sink.lock().push((done, total))));
        progress.add_submitted(2);
        progress.mark_completed();
        progress.mark_failed();
        assert_eq!(*seen.lock(), vec![(1, 2), (2, 2)]);
    }
}
