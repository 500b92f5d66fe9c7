//! Run options of a build.

use std::path::PathBuf;

use crate::executor::{CommitPolicy, DEFAULT_RETRIES};

/// Default directory for result logs.
pub const DEFAULT_RESULTS_DIR: &str = "logs";

/// Knobs of one build that are not part of the cube definition.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    /// Reset the store and write the schema before dispatching.
    pub initialize: bool,
    /// Cap on the number of jobs, for trial runs.
    pub limit: Option<usize>,
    /// Ask workers for verbose logging.
    pub debug: bool,
    /// Retries per job after the first attempt.
    pub retries: u32,
    pub commit_policy: CommitPolicy,
    /// Directory receiving the CSV result log.
    pub log_dir: PathBuf,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            initialize: true,
            limit: None,
            debug: false,
            retries: DEFAULT_RETRIES,
            commit_policy: CommitPolicy::default(),
            log_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
        }
    }
}
