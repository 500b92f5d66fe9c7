//! The build run: schema, jobs, dispatch, commit, log.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use super::error::BuildError;
use super::options::BuildOptions;
use super::result_log::ResultLog;
use crate::executor::{Dispatcher, ExecutionBackend};
use crate::grid::{ConfigError, CubeConfig};
use crate::jobs::{ChunkResult, JobGenerator};
use crate::landmask::LandMask;
use crate::storage::{create_dataset_schema, CommitOutcome, CubeStore, StorageError};

/// What a finished build did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Jobs submitted.
    pub total: usize,
    /// Jobs that wrote a composite.
    pub succeeded: usize,
    /// Jobs whose search found no scenes.
    pub no_data: usize,
    /// Jobs that exhausted their retries.
    pub failed: usize,
    /// Ocean tiles not turned into jobs.
    pub skipped_tiles: usize,
    /// `None` when the commit policy withheld the commit.
    pub commit: Option<CommitOutcome>,
    pub log_path: PathBuf,
    /// Per-job results in submission order.
    pub results: Vec<Option<ChunkResult>>,
}

impl RunSummary {
    /// Every job returned a result and the batch was committed.
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.commit.is_some()
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Builds (or extends) the cube described by `config` in `store`.
///
/// Configuration and storage problems abort the run before any job is
/// submitted. Individual chunk failures only show up in the summary; their
/// regions are discarded from the store before it commits, and a withheld
/// commit rolls the store back.
pub async fn run_build<B: ExecutionBackend>(
    config: CubeConfig,
    store: &dyn CubeStore,
    land_mask: &dyn LandMask,
    dispatcher: &Dispatcher<B>,
    options: &BuildOptions,
) -> Result<RunSummary, BuildError> {
    config.validate()?;
    info!(
        tiles = config.num_tiles(),
        periods = config.periods().len(),
        max_jobs = config.num_jobs(),
        store = %store.kind(),
        backend = dispatcher.backend().name(),
        "Starting build"
    );

    if options.initialize {
        create_dataset_schema(store, &config)?;
    }

    let config = Arc::new(config);
    let (jobs, skipped_tiles) = {
        let mut generator =
            JobGenerator::new(Arc::clone(&config), land_mask).with_limit(options.limit);
        let jobs: Vec<_> = generator.by_ref().collect();
        (jobs, generator.skipped_tiles())
    };
    info!(
        jobs = jobs.len(),
        skipped_tiles = skipped_tiles,
        "Computed tile intersections with land mask"
    );
    if jobs.is_empty() {
        return Err(ConfigError::NoLandTiles.into());
    }

    let target = store.target(config.varname())?;
    if !target.exists() {
        return Err(StorageError::MissingArray(target.to_string()).into());
    }

    let results = dispatcher
        .dispatch(jobs.clone(), &target, options.debug, options.retries)
        .await;

    let succeeded = results
        .iter()
        .filter(|r| r.as_ref().is_some_and(|r| r.success))
        .count();
    let failed = results.iter().filter(|r| r.is_none()).count();
    let no_data = results.len() - succeeded - failed;

    let commit = if options
        .commit_policy
        .should_commit(succeeded + no_data, failed)
    {
        // A job may have written before its last attempt failed to report.
        let failed_regions: Vec<_> = jobs
            .iter()
            .zip(&results)
            .filter(|(_, result)| result.is_none())
            .map(|(job, _)| job.write_region())
            .collect();
        Some(
            store
                .discard(config.varname(), &failed_regions)
                .and_then(|_| store.commit(&format!("Processed {} chunks", jobs.len()))),
        )
    } else {
        warn!(
            policy = %options.commit_policy,
            failed = failed,
            total = results.len(),
            "Commit withheld by commit policy"
        );
        store.rollback().err().map(Err)
    };

    let log = ResultLog::new(&options.log_dir, dispatcher.backend().name(), unix_seconds());
    let log_written = log.write(&jobs, &results);

    let commit = commit.transpose()?;
    if let Err(source) = log_written {
        error!(path = %log.path().display(), error = %source, "Failed to write result log");
        return Err(BuildError::ResultLog {
            path: log.path().to_path_buf(),
            source,
        });
    }

    info!(
        total = results.len(),
        succeeded = succeeded,
        no_data = no_data,
        failed = failed,
        committed = ?commit,
        log = %log.path().display(),
        "Build finished"
    );

    Ok(RunSummary {
        total: results.len(),
        succeeded,
        no_data,
        failed,
        skipped_tiles,
        commit,
        log_path: log.path().to_path_buf(),
        results,
    })
}
