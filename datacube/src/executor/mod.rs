//! Chunk job execution: backends, retries and batch dispatch.
//!
//! The [`Dispatcher`] fans a list of [`ChunkJob`](crate::jobs::ChunkJob)s out
//! to an [`ExecutionBackend`], retries each job independently according to a
//! [`RetryPolicy`], and returns one `Option<ChunkResult>` per job in input
//! order. `None` marks a job that exhausted its retries.
//!
//! # Backends
//!
//! | Backend | Where the chunk runs | Failure surfaces |
//! |---------|----------------------|------------------|
//! | [`LocalBackend`] | tokio task in this process | handler error, panic |
//! | [`ProcessBackend`] | `datacube worker` subprocess | exit status, timeout |
//! | [`HttpBackend`] | remote `datacube serve` | transport, timeout, remote error |
//!
//! # Example
//!
//! ```ignore
//! use datacube::executor::{Dispatcher, LocalBackend, RetryPolicy};
//!
//! let dispatcher = Dispatcher::new(LocalBackend::new(handler))
//!     .with_retry_policy(RetryPolicy::exponential(3))
//!     .with_max_in_flight(32);
//!
//! let results = dispatcher.dispatch(jobs, &target, false, 2).await;
//! let failed = results.iter().filter(|r| r.is_none()).count();
//! ```

mod backend;
mod dispatch;
mod http;
mod local;
mod policy;
mod process;
mod progress;

pub use backend::{
    Backend, BackendKind, ChunkHandler, ChunkRequest, ExecutionBackend, InvocationResponse,
    InvokeError,
};
pub use dispatch::{Dispatcher, SubmittedBatch, DEFAULT_MAX_IN_FLIGHT};
pub use http::{HttpBackend, INVOKE_PATH};
pub use local::LocalBackend;
pub use policy::{
    CommitPolicy, RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY_MS,
    DEFAULT_MAX_DELAY_SECS, DEFAULT_RETRIES,
};
pub use process::{ProcessBackend, DEFAULT_PROCESS_TIMEOUT_SECS};
pub use progress::{DispatchProgress, ProgressCallback};
