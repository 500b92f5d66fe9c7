//! Retrying fan-out of chunk jobs over a backend.
//!
//! ```text
//!   jobs[0..n] ──submit_all──► n tasks ──► semaphore (max_in_flight)
//!                                 │              │
//!                                 │        backend.invoke ──► Err ──► backoff, retry
//!                                 ▼              │
//!                          SubmittedBatch ◄── Ok / exhausted
//!                                 │
//!                            await_all ──► [Option<ChunkResult>; n]  (input order)
//! ```
//!
//! Every job retries on its own schedule. A failing job never cancels or
//! delays another; once its attempts are spent it yields `None`.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{ChunkRequest, ExecutionBackend};
use super::policy::RetryPolicy;
use super::progress::DispatchProgress;
use crate::jobs::{ChunkJob, ChunkResult};
use crate::storage::ArrayTarget;

/// Default cap on concurrent invocations.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Submits jobs to a backend with per-job retries.
pub struct Dispatcher<B: ExecutionBackend> {
    backend: Arc<B>,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    progress: DispatchProgress,
}

impl<B: ExecutionBackend> Dispatcher<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            retry: RetryPolicy::default(),
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT)),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            progress: DispatchProgress::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        self.permits = Arc::new(Semaphore::new(max_in_flight));
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_progress(mut self, progress: DispatchProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn progress(&self) -> &DispatchProgress {
        &self.progress
    }

    /// Spawns one task per job and returns without waiting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit_all(&self, jobs: Vec<ChunkJob>, target: &ArrayTarget, debug: bool) -> SubmittedBatch {
        self.submit_with_policy(jobs, target, debug, self.retry.clone())
    }

    fn submit_with_policy(
        &self,
        jobs: Vec<ChunkJob>,
        target: &ArrayTarget,
        debug: bool,
        retry: RetryPolicy,
    ) -> SubmittedBatch {
        self.progress.add_submitted(jobs.len());
        info!(
            backend = self.backend.name(),
            jobs = jobs.len(),
            max_attempts = retry.max_attempts(),
            max_in_flight = self.max_in_flight,
            "Submitting chunk jobs"
        );

        let handles = jobs
            .into_iter()
            .map(|job| {
                let request = ChunkRequest {
                    job,
                    target: target.clone(),
                    debug,
                };
                tokio::spawn(run_with_retry(
                    Arc::clone(&self.backend),
                    request,
                    retry.clone(),
                    Arc::clone(&self.permits),
                    self.progress.clone(),
                ))
            })
            .collect();

        SubmittedBatch {
            handles,
            progress: self.progress.clone(),
        }
    }

    /// Runs every job with up to `retries` retries each and waits for all.
    ///
    /// The result has one entry per job, in input order.
    pub async fn dispatch(
        &self,
        jobs: Vec<ChunkJob>,
        target: &ArrayTarget,
        debug: bool,
        retries: u32,
    ) -> Vec<Option<ChunkResult>> {
        let retry = self.retry.with_max_attempts(retries.saturating_add(1));
        self.submit_with_policy(jobs, target, debug, retry)
            .await_all()
            .await
    }
}

/// Jobs that have been submitted and are running.
pub struct SubmittedBatch {
    handles: Vec<JoinHandle<Option<ChunkResult>>>,
    progress: DispatchProgress,
}

impl SubmittedBatch {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every job, including its retries.
    pub async fn await_all(self) -> Vec<Option<ChunkResult>> {
        let mut results = Vec::with_capacity(self.handles.len());
        for (index, handle) in self.handles.into_iter().enumerate() {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(index = index, error = %e, "Dispatch task aborted");
                    self.progress.mark_failed();
                    results.push(None);
                }
            }
        }
        results
    }
}

async fn run_with_retry<B: ExecutionBackend>(
    backend: Arc<B>,
    request: ChunkRequest,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    progress: DispatchProgress,
) -> Option<ChunkResult> {
    let mut attempt = 1u32;
    loop {
        let outcome = match permits.acquire().await {
            Ok(_permit) => backend.invoke(request.clone()).await,
            Err(_) => {
                error!(job = %request.job, "Dispatcher shut down");
                progress.mark_failed();
                return None;
            }
        };

        match outcome {
            Ok(result) => {
                debug!(job = %request.job, attempt = attempt, success = result.success, "Chunk finished");
                progress.mark_completed();
                return Some(result);
            }
            Err(e) => match retry.delay_for_attempt(attempt) {
                Some(delay) => {
                    warn!(
                        job = %request.job,
                        attempt = attempt,
                        error = %e,
                        retry_in = ?delay,
                        "Chunk attempt failed, retrying"
                    );
                    progress.mark_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    error!(
                        job = %request.job,
                        attempts = attempt,
                        error = %e,
                        "Chunk failed, retries exhausted"
                    );
                    progress.mark_failed();
                    return None;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests::{jobs, target, ScriptedBackend};
    use crate::executor::InvokeError;
    use std::time::Duration;

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_results_keep_input_order_and_length() {
        let backend = ScriptedBackend::default().with_random_delay(20);
        let dispatcher = Dispatcher::new(backend).with_max_in_flight(3);
        let jobs = jobs(3, 3);

        let results = dispatcher.dispatch(jobs.clone(), &target(), false, 0).await;

        assert_eq!(results.len(), jobs.len());
        for (job, result) in jobs.iter().zip(&results) {
            let result = result.as_ref().unwrap();
            // ScriptedBackend echoes the tile as num_scenes
            assert_eq!(result.num_scenes, job.tile.row * 100 + job.tile.col);
        }
        assert_eq!(dispatcher.progress().completed(), 9);
    }

    #[tokio::test]
    async fn test_exhausted_job_is_none_others_unaffected() {
        let jobs = jobs(2, 2);
        let backend = ScriptedBackend::default().always_failing(&jobs[2]);
        let dispatcher = Dispatcher::new(backend).with_retry_policy(quick(1));

        let results = dispatcher.dispatch(jobs.clone(), &target(), false, 2).await;

        assert_eq!(results.iter().filter(|r| r.is_none()).count(), 1);
        assert!(results[2].is_none());
        assert_eq!(dispatcher.backend().attempts(&jobs[2]), 3);
        assert_eq!(dispatcher.backend().attempts(&jobs[0]), 1);
        assert_eq!(dispatcher.progress().failed(), 1);
        assert_eq!(dispatcher.progress().retries(), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_independently() {
        let jobs = jobs(1, 3);
        let backend = ScriptedBackend::default()
            .failing(&jobs[0], 2)
            .failing(&jobs[1], 1);
        let dispatcher = Dispatcher::new(backend).with_retry_policy(quick(1));

        let results = dispatcher.dispatch(jobs.clone(), &target(), false, 2).await;

        assert!(results.iter().all(Option::is_some));
        assert_eq!(dispatcher.backend().attempts(&jobs[0]), 3);
        assert_eq!(dispatcher.backend().attempts(&jobs[1]), 2);
        assert_eq!(dispatcher.backend().attempts(&jobs[2]), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_means_one_attempt() {
        let jobs = jobs(1, 1);
        let backend = ScriptedBackend::default().failing(&jobs[0], 1);
        let dispatcher = Dispatcher::new(backend).with_retry_policy(quick(5));

        let results = dispatcher.dispatch(jobs.clone(), &target(), false, 0).await;

        assert_eq!(results, vec![None]);
        assert_eq!(dispatcher.backend().attempts(&jobs[0]), 1);
    }

    #[tokio::test]
    async fn test_submit_all_uses_configured_policy() {
        let jobs = jobs(1, 2);
        let backend = ScriptedBackend::default().failing(&jobs[1], 1);
        let dispatcher = Dispatcher::new(backend).with_retry_policy(quick(2));

        let batch = dispatcher.submit_all(jobs, &target(), true);
        assert_eq!(batch.len(), 2);
        let results = batch.await_all().await;

        assert!(results.iter().all(Option::is_some));
        assert_eq!(dispatcher.progress().finished(), 2);
    }

    #[tokio::test]
    async fn test_in_flight_limit_is_respected() {
        let backend = ScriptedBackend::default().with_random_delay(10);
        let dispatcher = Dispatcher::new(backend).with_max_in_flight(2);

        dispatcher.dispatch(jobs(2, 4), &target(), false, 0).await;

        assert!(dispatcher.backend().peak_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_panicking_backend_yields_none() {
        struct PanickingBackend;
        impl ExecutionBackend for PanickingBackend {
            fn name(&self) -> &'static str {
                "panicking"
            }
            async fn invoke(&self, _: ChunkRequest) -> Result<ChunkResult, InvokeError> {
                panic!("backend bug")
            }
        }

        let dispatcher = Dispatcher::new(PanickingBackend);
        let results = dispatcher.dispatch(jobs(1, 2), &target(), false, 0).await;
        assert_eq!(results, vec![None, None]);
        assert_eq!(dispatcher.progress().failed(), 2);
    }
}
