//! Datacube - cloud-free Sentinel-2 median composites as a chunked array
//!
//! This library builds a `(time, latitude, longitude, band)` zarr cube by
//! fanning one job per land tile and period out to an execution backend,
//! retrying failed jobs independently, and committing the batch.
//!
//! ```text
//!   CubeConfig ──► JobGenerator ──► Dispatcher ──► Backend ──► WorkerHandler
//!       │          (land tiles      (retries,      (local,      (search, load,
//!       │           × periods)       in-flight)     process,     composite,
//!       ▼                                           http)        write)
//!   CubeStore ◄──────────── commit ◄── RunSummary ◄──────────────────┘
//! ```
//!
//! # High-Level API
//!
//! [`app::run_build`] wires everything together:
//!
//! ```ignore
//! use datacube::app::{run_build, BuildOptions};
//! use datacube::executor::{Dispatcher, LocalBackend};
//! use datacube::landmask::AllLand;
//! use datacube::storage::VersionedStore;
//! use datacube::worker::{ProcessorSettings, StacWorkerHandler};
//!
//! let handler = StacWorkerHandler::from_settings(&ProcessorSettings::default())?;
//! let dispatcher = Dispatcher::new(LocalBackend::new(handler));
//! let store = VersionedStore::new("/data/cubes/bay-area");
//!
//! let summary = run_build(config, &store, &AllLand, &dispatcher, &BuildOptions::default()).await?;
//! println!("{} of {} chunks written", summary.succeeded, summary.total);
//! ```

pub mod app;
pub mod catalog;
pub mod composite;
pub mod config;
pub mod executor;
pub mod grid;
pub mod http;
pub mod jobs;
pub mod landmask;
pub mod loader;
pub mod logging;
pub mod processor;
pub mod storage;
pub mod worker;

/// Version of the library and CLI.
///
/// Synchronized across the workspace through `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
