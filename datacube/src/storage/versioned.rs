//! Snapshot repository with atomic commits.
//!
//! ```text
//!   <repo>/
//!   ├── HEAD                 id of the current snapshot
//!   ├── commits.jsonl        one CommitRecord per line, oldest first
//!   ├── snapshots/<id>/      immutable zarr hierarchies
//!   └── sessions/<base>/<id>/  writes of an open session on snapshot <base>
//! ```
//!
//! A session starts as a copy of the head's metadata documents. Chunk files
//! written by workers land in the session only. On commit the head snapshot
//! is hard-linked into a staging directory, the session's changed files are
//! moved over it, the staging directory is renamed into place, the commit is
//! logged, and `HEAD` is swapped last. Readers of `HEAD` therefore see either
//! the previous snapshot or the complete new one, and every snapshot `HEAD`
//! names is in the log.
//!
//! Chunks of failed jobs are dropped from the session with
//! [`CubeStore::discard`] before the commit, so the new snapshot keeps the
//! base's contents for them. A session that is never committed is removed by
//! [`CubeStore::rollback`]; one left behind by a crashed run is swept when
//! the next session opens on a newer head.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    local_path, ArrayTarget, CommitOutcome, CubeStore, StorageError, StorageKind, ZarrChunkWriter,
};
use crate::jobs::WriteRegion;

const HEAD_FILE: &str = "HEAD";
const LOG_FILE: &str = "commits.jsonl";
const SNAPSHOTS_DIR: &str = "snapshots";
const SESSIONS_DIR: &str = "sessions";
const METADATA_FILE: &str = "zarr.json";

/// Message of the commit that creates an empty repository.
pub const INITIAL_COMMIT_MESSAGE: &str = "Initialize repository";

/// One entry of the commit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub id: String,
    pub parent: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Files that differ from the parent snapshot.
    pub changed_files: usize,
    /// SHA-256 over the sorted `(path, size)` listing of the snapshot.
    pub manifest_sha256: String,
}

#[derive(Debug)]
struct Session {
    id: String,
    base: String,
    path: PathBuf,
}

/// Transactional store keeping every committed state as a snapshot.
#[derive(Debug)]
pub struct VersionedStore {
    root: PathBuf,
    session: Mutex<Option<Session>>,
}

impl VersionedStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            session: Mutex::new(None),
        }
    }

    /// Parses a repository location: a plain path or a `file://` URI.
    pub fn from_uri(uri: &str) -> Result<Self, StorageError> {
        local_path(uri).map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Id of the current snapshot.
    pub fn head(&self) -> Result<String, StorageError> {
        let path = self.root.join(HEAD_FILE);
        match fs::read_to_string(&path) {
            Ok(id) => Ok(id.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::Repository(
                format!("{} is not an initialized repository", self.root.display()),
            )),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    pub fn snapshot_root(&self, id: &str) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR).join(id)
    }

    /// Directory of the current snapshot, for readers.
    pub fn head_root(&self) -> Result<PathBuf, StorageError> {
        Ok(self.snapshot_root(&self.head()?))
    }

    /// The commit log, oldest first.
    pub fn log(&self) -> Result<Vec<CommitRecord>, StorageError> {
        let path = self.root.join(LOG_FILE);
        let file = fs::File::open(&path).map_err(|e| StorageError::io(&path, e))?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| StorageError::io(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line)
                .map_err(|e| StorageError::Repository(format!("corrupt commit log: {e}")))?;
            records.push(record);
        }
        Ok(records)
    }

    /// Directories of the sessions currently on disk, from any handle.
    pub fn pending_sessions(&self) -> Result<Vec<PathBuf>, StorageError> {
        let dir = self.root.join(SESSIONS_DIR);
        let bases = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&dir, e)),
        };
        let mut sessions = Vec::new();
        for base in bases {
            let base = base.map_err(|e| StorageError::io(&dir, e))?.path();
            let entries = fs::read_dir(&base).map_err(|e| StorageError::io(&base, e))?;
            for entry in entries {
                sessions.push(entry.map_err(|e| StorageError::io(&base, e))?.path());
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    fn write_head(&self, id: &str) -> Result<(), StorageError> {
        let tmp = self.root.join(format!(".{HEAD_FILE}.tmp"));
        fs::write(&tmp, id).map_err(|e| StorageError::io(&tmp, e))?;
        let head = self.root.join(HEAD_FILE);
        fs::rename(&tmp, &head).map_err(|e| StorageError::io(&head, e))
    }

    fn append_log(&self, record: &CommitRecord) -> Result<(), StorageError> {
        let path = self.root.join(LOG_FILE);
        let line = serde_json::to_string(record)
            .map_err(|e| StorageError::Repository(format!("cannot encode commit: {e}")))?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;
        writeln!(file, "{line}").map_err(|e| StorageError::io(&path, e))
    }

    /// True when the repository holds nothing but its initial empty commit.
    fn is_pristine(&self) -> bool {
        let (Ok(head), Ok(log)) = (self.head(), self.log()) else {
            return false;
        };
        let [initial] = log.as_slice() else {
            return false;
        };
        if initial.id != head || initial.parent.is_some() {
            return false;
        }
        let snapshots = fs::read_dir(self.root.join(SNAPSHOTS_DIR))
            .map(|entries| entries.count())
            .unwrap_or(0);
        snapshots == 1 && list_files(&self.snapshot_root(&head)).is_ok_and(|f| f.is_empty())
    }

    /// Removes sessions opened on any snapshot other than `head`.
    ///
    /// They can never commit, since their base is no longer the head.
    fn sweep_stale_sessions(&self, head: &str) {
        let dir = self.root.join(SESSIONS_DIR);
        let Ok(entries) = fs::read_dir(&dir) else {
            return;
        };
        for entry in entries.flatten() {
            if entry.file_name().to_str() == Some(head) {
                continue;
            }
            let path = entry.path();
            match fs::remove_dir_all(&path) {
                Ok(()) => info!(path = %path.display(), "Removed stale sessions"),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove stale sessions")
                }
            }
        }
    }

    fn open_session(&self) -> Result<Session, StorageError> {
        let base = self.head()?;
        self.sweep_stale_sessions(&base);
        let base_root = self.snapshot_root(&base);
        let id = Uuid::new_v4().to_string();
        let path = self.root.join(SESSIONS_DIR).join(&base).join(&id);
        fs::create_dir_all(&path).map_err(|e| StorageError::io(&path, e))?;

        for rel in list_files(&base_root)? {
            if !is_metadata(&rel) {
                continue;
            }
            let dest = path.join(&rel);
            create_parent(&dest)?;
            fs::copy(base_root.join(&rel), &dest).map_err(|e| StorageError::io(&dest, e))?;
        }
        debug!(session = %id, base = %base, "Opened write session");
        Ok(Session { id, base, path })
    }

    /// Session files that differ from the base snapshot.
    fn changed_files(&self, session: &Session) -> Result<Vec<PathBuf>, StorageError> {
        let base_root = self.snapshot_root(&session.base);
        let mut changed = Vec::new();
        for rel in list_files(&session.path)? {
            if is_metadata(&rel) {
                let ours = session.path.join(&rel);
                let theirs = base_root.join(&rel);
                let ours = fs::read(&ours).map_err(|e| StorageError::io(&ours, e))?;
                if fs::read(&theirs).ok().as_deref() == Some(ours.as_slice()) {
                    continue;
                }
            }
            changed.push(rel);
        }
        Ok(changed)
    }

    fn publish(&self, session: &Session, changed: &[PathBuf]) -> Result<String, StorageError> {
        let id = Uuid::new_v4().to_string();
        let base_root = self.snapshot_root(&session.base);
        let staging = self.root.join(SNAPSHOTS_DIR).join(format!(".{id}.partial"));
        fs::create_dir_all(&staging).map_err(|e| StorageError::io(&staging, e))?;

        for rel in list_files(&base_root)? {
            let dest = staging.join(&rel);
            create_parent(&dest)?;
            let src = base_root.join(&rel);
            if fs::hard_link(&src, &dest).is_err() {
                fs::copy(&src, &dest).map_err(|e| StorageError::io(&dest, e))?;
            }
        }
        for rel in changed {
            let dest = staging.join(rel);
            create_parent(&dest)?;
            let src = session.path.join(rel);
            fs::rename(&src, &dest).map_err(|e| StorageError::io(&src, e))?;
        }

        let snapshot = self.snapshot_root(&id);
        fs::rename(&staging, &snapshot).map_err(|e| StorageError::io(&snapshot, e))?;
        Ok(id)
    }
}

impl CubeStore for VersionedStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Versioned
    }

    fn initialize(&self) -> Result<(), StorageError> {
        let mut session = self.session.lock();
        if self.is_pristine() {
            let sessions = self.root.join(SESSIONS_DIR);
            match fs::remove_dir_all(&sessions) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io(&sessions, e)),
            }
            *session = None;
            debug!(root = %self.root.display(), "Repository is already empty");
            return Ok(());
        }

        match fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(root = %self.root.display(), "Removed existing repository"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(&self.root, e)),
        }
        *session = None;

        let id = Uuid::new_v4().to_string();
        let snapshot = self.snapshot_root(&id);
        fs::create_dir_all(&snapshot).map_err(|e| StorageError::io(&snapshot, e))?;
        self.append_log(&CommitRecord {
            id: id.clone(),
            parent: None,
            message: INITIAL_COMMIT_MESSAGE.to_string(),
            timestamp: Utc::now(),
            changed_files: 0,
            manifest_sha256: manifest_digest(&snapshot)?,
        })?;
        self.write_head(&id)?;
        info!(root = %self.root.display(), snapshot = %id, "Initialized repository");
        Ok(())
    }

    fn writable_root(&self) -> Result<PathBuf, StorageError> {
        let mut session = self.session.lock();
        if let Some(open) = session.as_ref() {
            return Ok(open.path.clone());
        }
        let open = self.open_session()?;
        let path = open.path.clone();
        *session = Some(open);
        Ok(path)
    }

    fn commit(&self, message: &str) -> Result<CommitOutcome, StorageError> {
        let mut guard = self.session.lock();
        let Some(session) = guard.take() else {
            return Ok(CommitOutcome::Unchanged);
        };

        let head = self.head()?;
        if head != session.base {
            let error = StorageError::Repository(format!(
                "conflict: head moved from {} to {} while session {} was open",
                session.base, head, session.id
            ));
            *guard = Some(session);
            return Err(error);
        }

        let changed = self.changed_files(&session)?;
        if changed.is_empty() {
            remove_session(&session);
            debug!(session = %session.id, "Nothing to commit");
            return Ok(CommitOutcome::Unchanged);
        }

        let id = self.publish(&session, &changed)?;
        let snapshot = self.snapshot_root(&id);
        let logged = manifest_digest(&snapshot).and_then(|manifest_sha256| {
            self.append_log(&CommitRecord {
                id: id.clone(),
                parent: Some(session.base.clone()),
                message: message.to_string(),
                timestamp: Utc::now(),
                changed_files: changed.len(),
                manifest_sha256,
            })
        });
        if let Err(e) = logged {
            // An unlogged snapshot must never become the head.
            remove_session(&session);
            if let Err(e) = fs::remove_dir_all(&snapshot) {
                warn!(snapshot = %id, error = %e, "Failed to remove unlogged snapshot");
            }
            return Err(e);
        }
        self.write_head(&id)?;
        remove_session(&session);

        info!(
            snapshot = %id,
            parent = %session.base,
            changed_files = changed.len(),
            message = message,
            "Committed snapshot"
        );
        Ok(CommitOutcome::Committed { id })
    }

    fn discard(&self, array: &str, regions: &[WriteRegion]) -> Result<usize, StorageError> {
        let guard = self.session.lock();
        let Some(session) = guard.as_ref() else {
            return Ok(0);
        };
        let target = ArrayTarget::new(&session.path, array);
        if regions.is_empty() || !target.exists() {
            return Ok(0);
        }

        let writer = ZarrChunkWriter::open(&target)?;
        let mut dropped = 0;
        for region in regions {
            for path in writer.chunk_paths(region)? {
                match fs::remove_file(&path) {
                    Ok(()) => dropped += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(StorageError::io(&path, e)),
                }
            }
        }
        info!(
            session = %session.id,
            regions = regions.len(),
            chunks = dropped,
            "Discarded writes of failed jobs"
        );
        Ok(dropped)
    }

    fn rollback(&self) -> Result<(), StorageError> {
        if let Some(session) = self.session.lock().take() {
            remove_session(&session);
            info!(session = %session.id, base = %session.base, "Rolled back write session");
        }
        Ok(())
    }
}

fn is_metadata(rel: &Path) -> bool {
    rel.file_name().is_some_and(|name| name == METADATA_FILE)
}

fn create_parent(path: &Path) -> Result<(), StorageError> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e)),
        None => Ok(()),
    }
}

fn remove_session(session: &Session) {
    if let Err(e) = fs::remove_dir_all(&session.path) {
        warn!(session = %session.id, error = %e, "Failed to remove session directory");
    }
    // Fails while other sessions share the base.
    if let Some(parent) = session.path.parent() {
        let _ = fs::remove_dir(parent);
    }
}

/// Regular files below `root`, relative to it, sorted.
fn list_files(root: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];
    while let Some(rel) = pending.pop() {
        let dir = root.join(&rel);
        let entries = fs::read_dir(&dir).map_err(|e| StorageError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&dir, e))?;
            let file_type = entry.file_type().map_err(|e| StorageError::io(&dir, e))?;
            let child = rel.join(entry.file_name());
            if file_type.is_dir() {
                pending.push(child);
            } else if file_type.is_file() {
                files.push(child);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn manifest_digest(root: &Path) -> Result<String, StorageError> {
    let mut hasher = Sha256::new();
    for rel in list_files(root)? {
        let path = root.join(&rel);
        let size = fs::metadata(&path)
            .map_err(|e| StorageError::io(&path, e))?
            .len();
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(size.to_le_bytes());
    }
    Ok(format!("{:x}", hasher.finalize()))
}
