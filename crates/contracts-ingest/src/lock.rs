//! Cross-process mutual exclusion for sync runs
//!
//! Runs are independent processes, so the guard is an advisory lock on a file
//! next to the checkpoint rather than anything in memory.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// Non-blocking run guard
///
/// `try_acquire` either returns a guard immediately or fails with
/// [`SyncError::LockContention`]; it never waits. Dropping the guard releases
/// the lock.
pub trait RunLock: Send + Sync {
    type Guard: Send;

    fn try_acquire(&self) -> Result<Self::Guard>;
}

/// Advisory exclusive lock on a file (`flock`/`LockFileEx`)
#[derive(Debug, Clone)]
pub struct FileRunLock {
    path: PathBuf,
}

impl FileRunLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RunLock for FileRunLock {
    type Guard = FileLockGuard;

    fn try_acquire(&self) -> Result<FileLockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(SyncError::Lock)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %self.path.display(), "Acquired run lock");
                Ok(FileLockGuard {
                    file,
                    path: self.path.clone(),
                })
            },
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(SyncError::LockContention {
                    path: self.path.clone(),
                })
            },
            Err(e) => Err(SyncError::Lock(e)),
        }
    }
}

/// Held for the duration of a run
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        match FileExt::unlock(&self.file) {
            Ok(()) => debug!(path = %self.path.display(), "Released run lock"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to release run lock"),
        }
    }
}
