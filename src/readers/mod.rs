//! Reader registry — cross-process GC safety.
//!
//! Every process holding a pinned snapshot advertises it through a small
//! JSON file in the `readers/` subdirectory of the pages directory:
//!
//! ```text
//! readers/<pid>-<nonce>.reader   →  {"pid": …, "epoch": …, "timestampMs": …}
//! ```
//!
//! GC enumerates these files before reclaiming orphan pages; a live
//! reader pinned below the current epoch blocks reclamation (it never
//! blocks writers).  Files are created atomically (tmp + rename) and
//! removed when the owning snapshot refcount returns to zero.
//!
//! A crashed process cannot clean up after itself, so entries go **stale**:
//! any file whose mtime is older than the configured threshold (default
//! 30 s) is ignored and best-effort deleted during enumeration.

#[cfg(test)]
mod tests;

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Subdirectory of the pages directory holding reader files.
pub const READERS_DIR: &str = "readers";

/// Default staleness threshold for reader entries.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);

const READER_SUFFIX: &str = ".reader";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by reader-registry operations.
#[derive(Debug, Error)]
pub enum ReaderRegistryError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialisation failure.
    #[error("Reader entry JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// Reader entry
// ------------------------------------------------------------------------------------------------

/// One active reader as advertised on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderEntry {
    /// Process id of the reader.
    pub pid: u32,

    /// Epoch the reader has pinned.
    pub epoch: u64,

    /// Creation time, milliseconds since the UNIX epoch.
    pub timestamp_ms: u64,
}

// ------------------------------------------------------------------------------------------------
// Registry
// ------------------------------------------------------------------------------------------------

/// Handle to the reader registry for one database.
///
/// Each process writes only its own file; all processes may enumerate.
#[derive(Debug)]
pub struct ReaderRegistry {
    /// The `readers/` directory.
    dir: PathBuf,

    /// Staleness threshold for other processes' entries.
    stale_after: Duration,

    /// Path of this process's file while registered.
    own_file: Option<PathBuf>,
}

impl ReaderRegistry {
    /// Opens the registry rooted at `pages_dir`, creating the `readers/`
    /// subdirectory if needed.
    pub fn open(pages_dir: &Path, stale_after: Duration) -> Result<Self, ReaderRegistryError> {
        let dir = pages_dir.join(READERS_DIR);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            stale_after,
            own_file: None,
        })
    }

    /// Registers this process as a reader pinned at `epoch`.
    ///
    /// The entry is written to a temp file and renamed into place so other
    /// processes never observe a partial document.  Re-registering (e.g.
    /// after the pinned epoch moved) replaces the previous entry.
    pub fn register(&mut self, epoch: u64) -> Result<(), ReaderRegistryError> {
        let pid = std::process::id();
        let entry = ReaderEntry {
            pid,
            epoch,
            timestamp_ms: now_ms(),
        };

        let nonce: u32 = rand::rng().random();
        let name = format!("{pid}-{nonce:08x}{READER_SUFFIX}");
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!("{name}.tmp"));

        {
            let mut f = File::create(&tmp)?;
            f.write_all(&serde_json::to_vec(&entry)?)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        // Replace, not accumulate: drop a previous registration.
        if let Some(old) = self.own_file.replace(path) {
            let _ = fs::remove_file(old);
        }

        debug!(pid, epoch, "reader registered");
        Ok(())
    }

    /// Removes this process's reader file, if registered.
    pub fn deregister(&mut self) -> Result<(), ReaderRegistryError> {
        if let Some(path) = self.own_file.take() {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(ReaderRegistryError::Io(e)),
            }
            debug!(path = %path.display(), "reader deregistered");
        }
        Ok(())
    }

    /// Enumerates active readers across all processes.
    ///
    /// Entries older than the staleness threshold are skipped and
    /// best-effort deleted — a crashed process must not block GC forever.
    /// Unparseable files are skipped the same way.
    pub fn active_readers(&self) -> Result<Vec<ReaderEntry>, ReaderRegistryError> {
        let mut out = Vec::new();
        let now = SystemTime::now();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(READER_SUFFIX) {
                continue;
            }

            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .is_some_and(|age| age > self.stale_after);

            if stale {
                trace!(path = %path.display(), "pruning stale reader entry");
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to prune stale reader");
                }
                continue;
            }

            match fs::read(&path).map_err(ReaderRegistryError::Io).and_then(|raw| {
                serde_json::from_slice::<ReaderEntry>(&raw).map_err(ReaderRegistryError::Json)
            }) {
                Ok(reader) => out.push(reader),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable reader entry");
                    let _ = fs::remove_file(&path);
                }
            }
        }

        Ok(out)
    }

    /// Returns `true` when this process currently holds a registration.
    pub fn is_registered(&self) -> bool {
        self.own_file.is_some()
    }
}

impl Drop for ReaderRegistry {
    fn drop(&mut self) {
        let _ = self.deregister();
    }
}

/// Milliseconds since the UNIX epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
