//! Build orchestration.
//!
//! ```text
//!   CubeConfig ──validate──► create_dataset_schema (if initialize)
//!        │
//!        ▼
//!   JobGenerator (land tiles × periods) ──► Dispatcher::dispatch
//!                                                  │
//!                     CommitPolicy ──► store.discard(failed regions)
//!                          │                       │
//!                          │                       ▼
//!                          │            store.commit("Processed N chunks")
//!                          └── withheld ──► store.rollback()
//!                                                  │
//!                                   logs/{unix_seconds}-{backend}.csv
//! ```
//!
//! # Example
//!
//! ```ignore
//! use datacube::app::{run_build, BuildOptions};
//!
//! let summary = run_build(config, &store, &land_mask, &dispatcher, &BuildOptions::default()).await?;
//! println!("{} of {} chunks written", summary.succeeded, summary.total);
//! ```

mod build;
mod error;
mod options;
mod result_log;

pub use build::{run_build, RunSummary};
pub use error::BuildError;
pub use options::{BuildOptions, DEFAULT_RESULTS_DIR};
pub use result_log::{render as render_result_log, ResultLog, RESULT_LOG_COLUMNS};
