//! Build error types.

use std::fmt;
use std::path::PathBuf;

use crate::grid::ConfigError;
use crate::storage::StorageError;

/// Errors that abort a build. Per-chunk failures never surface here.
#[derive(Debug)]
pub enum BuildError {
    /// The cube configuration is invalid or selects no work.
    Config(ConfigError),

    /// Schema creation, target lookup or commit failed.
    Storage(StorageError),

    /// The result log could not be written.
    ResultLog {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Config(e) => write!(f, "Invalid configuration: {}", e),
            BuildError::Storage(e) => write!(f, "Storage error: {}", e),
            BuildError::ResultLog { path, source } => {
                write!(f, "Failed to write result log {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::Config(e) => Some(e),
            BuildError::Storage(e) => Some(e),
            BuildError::ResultLog { source, .. } => Some(source),
        }
    }
}

impl From<ConfigError> for BuildError {
    fn from(e: ConfigError) -> Self {
        BuildError::Config(e)
    }
}

impl From<StorageError> for BuildError {
    fn from(e: StorageError) -> Self {
        BuildError::Storage(e)
    }
}
