//! Snapshot persistence for [`LedgerState`].
//!
//! The ledger needs three calls: load the whole snapshot, save the whole
//! snapshot, and hold the writer lock around the two. [`JsonFileStore`] keeps
//! the snapshot as pretty-printed JSON of the form
//! `{"balances": {..}, "stakes": {..}}`, replaces the file with a write-rename
//! so a crash mid-save never leaves a torn snapshot behind, and serializes
//! writers across processes with an advisory lock on `<snapshot>.lock`.

use std::{
    ffi::OsString,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::ledger::LedgerState;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt ledger snapshot at {}: {source}", .path.display())]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode ledger snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait SnapshotStore: Send + Sync {
    /// Returns an empty state when nothing has been persisted yet.
    fn load(&self) -> Result<LedgerState, StoreError>;

    fn save(&self, state: &LedgerState) -> Result<(), StoreError>;

    /// Runs `critical` while no other writer of the same snapshot can load or
    /// save. Stores only ever reached through one handle can keep the default.
    fn exclusive<T>(&self, critical: impl FnOnce() -> T) -> Result<T, StoreError> {
        Ok(critical())
    }
}

impl<T: SnapshotStore> SnapshotStore for &T {
    fn load(&self) -> Result<LedgerState, StoreError> {
        (**self).load()
    }

    fn save(&self, state: &LedgerState) -> Result<(), StoreError> {
        (**self).save(state)
    }

    fn exclusive<R>(&self, critical: impl FnOnce() -> R) -> Result<R, StoreError> {
        (**self).exclusive(critical)
    }
}

#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sidecar file the writer lock is taken on, `<snapshot>.lock`.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    fn io_error(path: &Path, source: io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn parent_dir(&self) -> Result<&Path, StoreError> {
        match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(|e| Self::io_error(parent, e))?;
                Ok(parent)
            }
            None => Ok(Path::new(".")),
        }
    }

    fn atomic_write(&self, data: &[u8]) -> Result<(), StoreError> {
        let dir = self.parent_dir()?;
        // Unique name per writer, in the target's directory so the rename
        // never crosses filesystems.
        let mut temp = NamedTempFile::new_in(dir).map_err(|e| Self::io_error(dir, e))?;
        temp.write_all(data)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| Self::io_error(temp.path(), e))?;
        temp.persist(&self.path)
            .map_err(|e| Self::io_error(&self.path, e.error))?;
        Ok(())
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<LedgerState, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no snapshot on disk, starting empty");
                return Ok(LedgerState::new());
            }
            Err(err) => return Err(Self::io_error(&self.path, err)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            info!(path = %self.path.display(), "snapshot file is empty, starting empty");
            return Ok(LedgerState::new());
        }
        let state: LedgerState =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::CorruptState {
                path: self.path.clone(),
                source,
            })?;
        debug!(
            path = %self.path.display(),
            balances = state.balances.len(),
            stakes = state.stakes.len(),
            "snapshot loaded"
        );
        Ok(state)
    }

    fn save(&self, state: &LedgerState) -> Result<(), StoreError> {
        let mut encoded = serde_json::to_vec_pretty(state)?;
        encoded.push(b'\n');
        self.atomic_write(&encoded)?;
        debug!(path = %self.path.display(), bytes = encoded.len(), "snapshot saved");
        Ok(())
    }

    /// Blocks until the advisory lock on [`lock_path`](Self::lock_path) is
    /// free. The lock is tied to the open file, so it is released on drop and
    /// when a holding process dies.
    fn exclusive<T>(&self, critical: impl FnOnce() -> T) -> Result<T, StoreError> {
        self.parent_dir()?;
        let lock_path = self.lock_path();
        let file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| Self::io_error(&lock_path, e))?;
        let mut lock = fd_lock::RwLock::new(file);
        let _guard = lock.write().map_err(|e| Self::io_error(&lock_path, e))?;
        debug!(lock = %lock_path.display(), "writer lock held");
        Ok(critical())
    }
}

/// In-process store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<LedgerState>,
    writer: Mutex<()>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: LedgerState) -> Self {
        Self {
            snapshot: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Number of successful `save` calls so far.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> LedgerState {
        self.snapshot.lock().clone()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<LedgerState, StoreError> {
        Ok(self.snapshot.lock().clone())
    }

    fn save(&self, state: &LedgerState) -> Result<(), StoreError> {
        *self.snapshot.lock() = state.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn exclusive<T>(&self, critical: impl FnOnce() -> T) -> Result<T, StoreError> {
        let _writer = self.writer.lock();
        Ok(critical())
    }
}
