//! Destination array storage.
//!
//! Two interchangeable [`CubeStore`] backends hold the output zarr hierarchy:
//!
//! - [`PlainStore`]: a directory written in place. `commit` is a no-op, so
//!   every chunk write is visible as soon as it lands and an interrupted run
//!   leaves a partially written array behind.
//! - [`VersionedStore`]: a repository of immutable snapshots. Workers write
//!   into a session directory and `commit` publishes the session as a new
//!   snapshot in one atomic pointer swap.
//!
//! Workers never see the store itself, only an [`ArrayTarget`] naming the
//! directory and array to write into.
//!
//! # Example
//!
//! ```ignore
//! use datacube::storage::{create_dataset_schema, CubeStore, VersionedStore};
//!
//! let store = VersionedStore::new("/data/cubes/bay-area");
//! create_dataset_schema(&store, &config)?;
//! let target = store.target(config.varname())?;
//! // ... dispatch jobs against `target` ...
//! store.commit("Processed 42 chunks")?;
//! ```

mod plain;
mod schema;
mod versioned;
mod writer;

pub use plain::PlainStore;
pub use schema::{write_schema, DATASET_TITLE};
pub use versioned::{CommitRecord, VersionedStore, INITIAL_COMMIT_MESSAGE};
pub use writer::{ChunkWriter, ZarrChunkWriter};

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::grid::CubeConfig;
use crate::jobs::WriteRegion;

const FILE_SCHEME: &str = "file://";

/// Commit message written after the schema is created.
pub const SCHEMA_COMMIT_MESSAGE: &str = "Wrote initial dataset schema";

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("zarr error: {0}")]
    Zarr(String),

    #[error("array '{0}' does not exist in the store")]
    MissingArray(String),

    #[error("data has {actual} elements but the region holds {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("repository error: {0}")]
    Repository(String),

    #[error("unsupported store location '{0}'")]
    InvalidLocation(String),
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn zarr(e: impl fmt::Display) -> Self {
        Self::Zarr(e.to_string())
    }
}

/// Resolves a store location, a plain path or a `file://` URI, to a path.
pub fn local_path(uri: &str) -> Result<PathBuf, StorageError> {
    if let Some(path) = uri.strip_prefix(FILE_SCHEME) {
        return Ok(PathBuf::from(path));
    }
    if uri.contains("://") || uri.is_empty() {
        return Err(StorageError::InvalidLocation(uri.to_string()));
    }
    Ok(PathBuf::from(uri))
}

/// Which storage backend a store is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Plain,
    Versioned,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Versioned => write!(f, "versioned"),
        }
    }
}

impl std::str::FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "versioned" => Ok(Self::Versioned),
            other => Err(format!(
                "unknown storage backend '{other}' (expected plain or versioned)"
            )),
        }
    }
}

/// Opens the store of `kind` at `location`.
pub fn open_store(kind: StorageKind, location: &str) -> Result<Box<dyn CubeStore>, StorageError> {
    Ok(match kind {
        StorageKind::Plain => Box::new(PlainStore::from_uri(location)?),
        StorageKind::Versioned => Box::new(VersionedStore::from_uri(location)?),
    })
}

/// What a commit did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new snapshot was published.
    Committed { id: String },
    /// Nothing was written since the last commit.
    Unchanged,
    /// The backend has no commit boundary; writes are already visible.
    NotTransactional,
}

/// The destination store of a cube.
pub trait CubeStore: Send + Sync {
    fn kind(&self) -> StorageKind;

    /// Destroys any previous contents and recreates an empty store.
    ///
    /// Calling it twice leaves the same empty state as calling it once.
    fn initialize(&self) -> Result<(), StorageError>;

    /// Directory that receives this run's writes.
    fn writable_root(&self) -> Result<PathBuf, StorageError>;

    /// Finalizes writes made under [`writable_root`](Self::writable_root).
    fn commit(&self, message: &str) -> Result<CommitOutcome, StorageError>;

    /// Takes back whatever was written to `regions` of `array` since the
    /// last commit, so the next commit keeps their previous contents.
    ///
    /// Returns the number of chunk files dropped. A store without a commit
    /// boundary cannot take writes back and drops nothing.
    fn discard(&self, array: &str, regions: &[WriteRegion]) -> Result<usize, StorageError>;

    /// Abandons every write made since the last commit.
    fn rollback(&self) -> Result<(), StorageError>;

    /// Handle workers use to write into `array`.
    fn target(&self, array: &str) -> Result<ArrayTarget, StorageError> {
        Ok(ArrayTarget::new(self.writable_root()?, array))
    }
}

/// Serializable location of the destination array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayTarget {
    pub root: PathBuf,
    pub array: String,
}

impl ArrayTarget {
    pub fn new(root: impl Into<PathBuf>, array: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            array: array.into(),
        }
    }

    /// Node path inside the hierarchy, e.g. `/rgb_median`.
    pub fn node_path(&self) -> String {
        format!("/{}", self.array.trim_start_matches('/'))
    }

    /// True when array metadata exists at the target.
    pub fn exists(&self) -> bool {
        self.root
            .join(self.array.trim_start_matches('/'))
            .join("zarr.json")
            .is_file()
    }
}

impl fmt::Display for ArrayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.root.display(), self.node_path())
    }
}

/// Resets `store` and writes an empty cube described by `config`.
pub fn create_dataset_schema(
    store: &dyn CubeStore,
    config: &CubeConfig,
) -> Result<CommitOutcome, StorageError> {
    store.initialize()?;
    let root = store.writable_root()?;
    write_schema(&root, config)?;
    let outcome = store.commit(SCHEMA_COMMIT_MESSAGE)?;
    info!(store = %store.kind(), root = %root.display(), "Dataset schema created");
    Ok(outcome)
}
