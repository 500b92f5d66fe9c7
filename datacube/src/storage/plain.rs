//! Non-transactional directory store.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{local_path, CommitOutcome, CubeStore, StorageError, StorageKind};
use crate::jobs::WriteRegion;

/// A zarr hierarchy written in place under one directory.
#[derive(Debug, Clone)]
pub struct PlainStore {
    root: PathBuf,
}

impl PlainStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Parses a store location: a plain path or a `file://` URI.
    pub fn from_uri(uri: &str) -> Result<Self, StorageError> {
        local_path(uri).map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CubeStore for PlainStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Plain
    }

    fn initialize(&self) -> Result<(), StorageError> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(root = %self.root.display(), "Removed existing store"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(&self.root, e)),
        }
        std::fs::create_dir_all(&self.root).map_err(|e| StorageError::io(&self.root, e))?;
        info!(root = %self.root.display(), "Initialized plain store");
        Ok(())
    }

    fn writable_root(&self) -> Result<PathBuf, StorageError> {
        Ok(self.root.clone())
    }

    fn commit(&self, message: &str) -> Result<CommitOutcome, StorageError> {
        debug!(message = message, "Plain store has no commits");
        Ok(CommitOutcome::NotTransactional)
    }

    fn discard(&self, array: &str, regions: &[WriteRegion]) -> Result<usize, StorageError> {
        if !regions.is_empty() {
            warn!(
                array = array,
                regions = regions.len(),
                "Plain store keeps partial writes of failed jobs"
            );
        }
        Ok(0)
    }

    fn rollback(&self) -> Result<(), StorageError> {
        debug!("Plain store has nothing to roll back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_uri() {
        assert_eq!(
            PlainStore::from_uri("file:///tmp/cube").unwrap().root(),
            Path::new("/tmp/cube")
        );
        assert_eq!(
            PlainStore::from_uri("relative/cube").unwrap().root(),
            Path::new("relative/cube")
        );
        assert!(matches!(
            PlainStore::from_uri("s3://bucket/cube"),
            Err(StorageError::InvalidLocation(_))
        ));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = PlainStore::new(dir.path().join("cube"));

        store.initialize().unwrap();
        std::fs::write(store.root().join("stale"), "x").unwrap();
        store.initialize().unwrap();
        store.initialize().unwrap();

        assert!(store.root().is_dir());
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);
    }

    #[test]
    fn test_commit_is_not_transactional() {
        let store = PlainStore::new("/nonexistent");
        assert_eq!(store.commit("msg").unwrap(), CommitOutcome::NotTransactional);
        assert_eq!(store.writable_root().unwrap(), PathBuf::from("/nonexistent"));
    }

    #[test]
    fn test_discard_keeps_written_chunks() {
        let store = PlainStore::new("/nonexistent");
        let region = WriteRegion {
            time: 0..1,
            rows: 0..2,
            cols: 0..2,
            bands: 0..3,
        };
        assert_eq!(store.discard("rgb_median", &[region]).unwrap(), 0);
        store.rollback().unwrap();
    }
}
