//! MVCC — epochs, snapshots, and pin tracking.
//!
//! The epoch is a monotonic counter advanced by every successful flush,
//! compaction, and GC.  A reader *pins* an epoch for the duration of its
//! snapshot: the snapshot resolves the manifest current at pin time and
//! keeps reading exactly that state no matter how far the writer moves on.
//!
//! # Snapshot mechanics
//!
//! A [`Snapshot`] owns a clone of the pinned manifest plus a memory map of
//! each ordering's page file taken at pin time.  Later flushes only ever
//! **append** pages and orphan old ones — offsets already referenced by
//! the pinned page table stay valid inside the mapped image.  When GC
//! rewrites a page file, the rename unlinks the old inode but the mapping
//! keeps it alive, so even a swap under a pinned reader cannot tear its
//! view.  (GC additionally refuses to run while a reader is pinned below
//! the current epoch; the mapping is the second line of defence for
//! cross-process readers.)
//!
//! # Pin counting
//!
//! [`SnapshotTracker`] refcounts pins: the first pin resolves a snapshot,
//! nested pins (a query started while an epoch is pinned) reuse it
//! without re-reading the manifest, and the last unpin releases it.  The
//! engine registers/deregisters the process in the reader registry around
//! the zero-crossings.

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeSet,
    fs::File,
    io,
    path::Path,
    sync::{Arc, Mutex},
};

use memmap2::Mmap;
use tracing::{debug, trace};

use crate::manifest::Manifest;
use crate::pages::{self, PageError};
use crate::triple::{Order, Triple};

// ------------------------------------------------------------------------------------------------
// Snapshot
// ------------------------------------------------------------------------------------------------

/// An immutable view of the database at a pinned epoch.
#[derive(Debug)]
pub struct Snapshot {
    /// The manifest as of the pinned epoch.
    manifest: Manifest,

    /// Tombstone set extracted from the manifest for O(log n) lookups.
    tombstones: BTreeSet<Triple>,

    /// Per-ordering page-file images, indexed by `Order::tag()`.
    /// `None` when the ordering has no pages yet.
    images: [Option<Mmap>; 3],

    /// Page size the images were written with.
    page_size: usize,
}

impl Snapshot {
    /// Resolves a snapshot of `manifest` against the page files in
    /// `pages_dir`.
    pub fn open(pages_dir: &Path, manifest: Manifest) -> Result<Self, PageError> {
        let page_size = manifest.page_size as usize;
        let mut images: [Option<Mmap>; 3] = [None, None, None];

        for order in Order::ALL {
            let path = pages_dir.join(order.file_name());
            let file = match File::open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(PageError::Io(e)),
            };
            if file.metadata()?.len() == 0 {
                continue;
            }
            // Mapping is read-only; the writer only appends and GC swaps
            // whole files, so the image stays internally consistent.
            let mmap = unsafe { Mmap::map(&file)? };
            images[order.tag() as usize] = Some(mmap);
        }

        let tombstones = manifest
            .tombstones
            .iter()
            .map(|&key| Triple::from(key))
            .collect();

        debug!(epoch = manifest.epoch, "snapshot resolved");
        Ok(Self {
            manifest,
            tombstones,
            images,
            page_size,
        })
    }

    /// Epoch this snapshot observes.
    pub fn epoch(&self) -> u64 {
        self.manifest.epoch
    }

    /// The pinned manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Returns `true` when `t` is masked by the pinned tombstone set.
    pub fn is_tombstoned(&self, t: Triple) -> bool {
        self.tombstones.contains(&t)
    }

    /// Primaries present in the pinned page table of `order`.
    pub fn primaries(&self, order: Order) -> impl Iterator<Item = u32> + '_ {
        self.manifest.ordering(order).lookups.keys().copied()
    }

    /// Returns `true` when the page table has a chain for
    /// `(order, primary)`.
    pub fn has_chain(&self, order: Order, primary: u32) -> bool {
        self.manifest
            .ordering(order)
            .lookups
            .contains_key(&primary)
    }

    /// Reads the raw chain for `(order, primary)` — tombstones **not**
    /// applied.  Missing chains read as empty.
    pub fn chain(&self, order: Order, primary: u32) -> Result<Vec<Triple>, PageError> {
        let Some(offsets) = self.manifest.ordering(order).lookups.get(&primary) else {
            return Ok(Vec::new());
        };
        let Some(image) = &self.images[order.tag() as usize] else {
            return Err(PageError::Corrupt {
                order: order.name(),
                offset: offsets.first().copied().unwrap_or(0),
                reason: "page table references missing page file",
            });
        };
        pages::read_chain_from(image, order, primary, offsets, self.page_size)
    }

    /// Reads the chain for `(order, primary)` with the pinned tombstone
    /// set applied.
    pub fn chain_visible(&self, order: Order, primary: u32) -> Result<Vec<Triple>, PageError> {
        let mut triples = self.chain(order, primary)?;
        triples.retain(|t| !self.tombstones.contains(t));
        Ok(triples)
    }
}

// ------------------------------------------------------------------------------------------------
// Pin tracking
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PinState {
    snapshot: Option<Arc<Snapshot>>,
    refcount: usize,
}

/// Refcounted snapshot pinning.
///
/// The zero-to-one transition resolves a fresh snapshot; one-to-zero
/// releases it.  Both transitions are reported to the caller so the
/// engine can maintain the reader registry.
#[derive(Debug, Default)]
pub struct SnapshotTracker {
    state: Mutex<PinState>,
}

impl SnapshotTracker {
    /// Creates an unpinned tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the current epoch, resolving a snapshot through `make` only
    /// when none is pinned yet.
    ///
    /// Returns the snapshot and `true` when this call performed the
    /// initial pin (the caller should register a reader entry).
    pub fn pin_with<E>(
        &self,
        make: impl FnOnce() -> Result<Snapshot, E>,
    ) -> Result<(Arc<Snapshot>, bool), E> {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(snapshot) = state.snapshot.clone() {
            state.refcount += 1;
            trace!(refcount = state.refcount, "snapshot pin reused");
            return Ok((snapshot, false));
        }

        let snapshot = Arc::new(make()?);
        state.snapshot = Some(Arc::clone(&snapshot));
        state.refcount = 1;
        trace!(epoch = snapshot.epoch(), "snapshot pinned");
        Ok((snapshot, true))
    }

    /// Drops one pin.
    ///
    /// Returns the released epoch when the refcount reaches zero (the
    /// caller should deregister its reader entry), `None` otherwise.
    pub fn unpin(&self) -> Option<u64> {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.refcount == 0 {
            return None;
        }
        state.refcount -= 1;
        if state.refcount == 0 {
            let epoch = state.snapshot.take().map(|s| s.epoch());
            trace!(?epoch, "snapshot released");
            epoch
        } else {
            None
        }
    }

    /// Epoch currently pinned, if any.
    pub fn pinned_epoch(&self) -> Option<u64> {
        let state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.snapshot.as_ref().map(|s| s.epoch())
    }
}
