//! Advisory, process-level exclusive write lock.
//!
//! `open` in write mode acquires an exclusive advisory lock on
//! `<db>.lock`; a second writer fails fast instead of corrupting the
//! database.  Reader-only opens never touch the lock.  The lock is
//! advisory — cooperating processes honour it, the OS may or may not
//! enforce more.

use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};

use fs4::fs_std::FileExt as FileLockExt;
use thiserror::Error;
use tracing::debug;

/// Errors returned while acquiring the write lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another writer already holds the lock.
    #[error("database is locked by another writer")]
    AlreadyLocked,

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Held exclusive lock on a database's lock file.
///
/// Dropping the handle releases the lock (explicitly via `unlock`, and in
/// any case when the file closes).
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Creates (if needed) and exclusively locks the file at `path`.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let file = File::options().append(true).create(true).open(path)?;

        match FileLockExt::try_lock_exclusive(&file) {
            Ok(true) => {
                debug!(path = %path.display(), "write lock acquired");
                Ok(Self {
                    file,
                    path: path.to_path_buf(),
                })
            }
            Ok(false) => Err(LockError::AlreadyLocked),
            Err(err) => Err(LockError::Io(err)),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = FileLockExt::unlock(&self.file);
        debug!(path = %self.path.display(), "write lock released");
    }
}
