//! Garbage collection — reclaiming orphan pages.
//!
//! Flush and compaction never delete bytes; they orphan old pages and
//! let the page files grow.  GC is the only operation that shrinks a
//! file: it rewrites each ordering's page file keeping **only** the
//! pages the current page table references, remaps the table's offsets
//! to the new positions, and swaps in a manifest with empty orphan
//! lists.  Surviving page bodies are copied byte-identical; only the
//! header next-links (and therefore checksums) change.
//!
//! # Commit protocol
//!
//! A GC pass touches up to four files (three page files plus the
//! manifest), and only single-file renames are atomic.  The pass is
//! therefore journalled through a commit marker:
//!
//! 1. stream surviving pages into `pages.XXX.tmp` for every ordering
//!    with orphans, fsync each;
//! 2. write the fully-remapped manifest document to `gc.commit`
//!    (tmp + fsync + rename) — **this is the commit point**;
//! 3. rename each `pages.XXX.tmp` over its live file, fsync the
//!    directory;
//! 4. store the manifest through the normal atomic swap;
//! 5. delete `gc.commit`.
//!
//! A crash before step 2 leaves only ignorable temp files.  A crash
//! after it is finished by [`recover`] at the next open: complete the
//! remaining renames (idempotent — an already-renamed ordering has no
//! temp file left), re-store the manifest from the marker, delete the
//! marker.
//!
//! # Reader safety
//!
//! The engine gates GC on the reader registry: any active reader pinned
//! below the current epoch could still reach an orphan, so the pass is
//! skipped with a non-error outcome.  In-process pinned snapshots hold a
//! memory map of the old file image and survive the swap regardless.


use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Write},
    path::Path,
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::manifest::{fsync_dir, Manifest, ManifestError};
use crate::pages::{page_crc, PageError, PageFile, PageHeader, NO_NEXT, PAGE_HEADER_SIZE};
use crate::triple::Order;

/// Commit marker file name inside the pages directory.
pub const GC_COMMIT_FILENAME: &str = "gc.commit";

// ------------------------------------------------------------------------------------------------
// Outcome types
// ------------------------------------------------------------------------------------------------

/// Statistics of a completed GC pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    /// Orphan pages dropped across all orderings.
    pub pages_reclaimed: usize,

    /// Bytes the page files shrank by.
    pub bytes_reclaimed: u64,
}

/// Result of a GC request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcOutcome {
    /// Orphans were reclaimed (with zero stats when there were none).
    Done(GcStats),

    /// The pass was skipped; nothing changed.
    Skipped {
        /// Why — currently always `"active_readers"`.
        reason: &'static str,
    },
}

/// Errors returned by GC.
#[derive(Debug, Error)]
pub enum GcError {
    /// Page read/write failure.
    #[error("Page error: {0}")]
    Page(#[from] PageError),

    /// Manifest failure.
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ------------------------------------------------------------------------------------------------
// Collection
// ------------------------------------------------------------------------------------------------

/// Runs the rewrite-and-swap pass.
///
/// `manifest` is the engine's working copy; on success it has remapped
/// page tables and empty orphan lists, and **has been stored** (GC owns
/// the swap because of the commit protocol above).  The epoch is left
/// alone — GC changes layout, not visible state.  The caller only
/// installs the returned manifest in memory.
pub(crate) fn collect(
    manifest: &mut Manifest,
    files: &mut [PageFile; 3],
    pages_dir: &Path,
) -> Result<GcStats, GcError> {
    let page_size = manifest.page_size as usize;
    let mut stats = GcStats::default();

    // 1. Plan and write temp files for every ordering with orphans.
    let mut rewritten: Vec<Order> = Vec::new();
    for order in Order::ALL {
        let orphan_count = manifest.ordering(order).orphans.len();
        if orphan_count == 0 {
            continue;
        }

        let file = &files[order.tag() as usize];
        let old_len = file.len();

        // New layout: pages stream out in page-table order, so every
        // chain is contiguous and next-links are known up front.
        let lookups = manifest.ordering(order).lookups.clone();
        let mut new_lookups: BTreeMap<u32, Vec<u64>> = BTreeMap::new();
        let mut new_offset: u64 = 0;
        for (&primary, offsets) in &lookups {
            let chain: Vec<u64> = (0..offsets.len())
                .map(|i| new_offset + (i * page_size) as u64)
                .collect();
            new_offset += (offsets.len() * page_size) as u64;
            new_lookups.insert(primary, chain);
        }

        let tmp_path = pages_dir.join(format!("{}.tmp", order.file_name()));
        {
            let mut tmp = File::create(&tmp_path)?;
            for (primary, offsets) in &lookups {
                let new_chain = &new_lookups[primary];
                for (i, &offset) in offsets.iter().enumerate() {
                    let mut page = file.read_page_raw(offset, page_size)?;
                    relink_page(&mut page, order, offset, new_chain.get(i + 1).copied())?;
                    tmp.write_all(&page)?;
                }
            }
            tmp.sync_all()?;
        }

        let state = manifest.ordering_mut(order);
        state.lookups = new_lookups;
        state.orphans.clear();

        stats.pages_reclaimed += orphan_count;
        stats.bytes_reclaimed += old_len.saturating_sub(new_offset);
        rewritten.push(order);

        debug!(
            order = order.name(),
            orphans = orphan_count,
            old_len,
            new_len = new_offset,
            "page file rewritten to temp"
        );
    }

    if rewritten.is_empty() {
        return Ok(stats);
    }

    // 2. Commit point: persist the remapped manifest to the marker.
    write_marker(manifest, pages_dir)?;

    // 3. Swap the page files and refresh the writer handles.
    for &order in &rewritten {
        let tmp_path = pages_dir.join(format!("{}.tmp", order.file_name()));
        let file = &mut files[order.tag() as usize];
        fs::rename(&tmp_path, file.path())?;
        file.reopen()?;
    }
    fsync_dir(pages_dir)?;

    // 4. Normal manifest swap, then drop the marker.
    manifest.store(pages_dir)?;
    remove_marker(pages_dir)?;

    info!(
        pages = stats.pages_reclaimed,
        bytes = stats.bytes_reclaimed,
        "gc finished"
    );
    Ok(stats)
}

// ------------------------------------------------------------------------------------------------
// Crash recovery
// ------------------------------------------------------------------------------------------------

/// Finishes (or discards) an interrupted GC pass.  Called at open,
/// before the manifest is loaded.
///
/// Returns `true` when a marker was found and the pass was completed.
pub(crate) fn recover(pages_dir: &Path) -> Result<bool, GcError> {
    let marker_path = pages_dir.join(GC_COMMIT_FILENAME);
    let raw = match fs::read(&marker_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            // No marker: any leftover temp files predate the commit
            // point and are plain garbage.
            discard_temp_files(pages_dir);
            return Ok(false);
        }
        Err(e) => return Err(GcError::Io(e)),
    };

    let mut manifest: Manifest = match serde_json::from_slice(&raw) {
        Ok(m) => m,
        Err(e) => {
            // Torn marker ⇒ the commit point was never reached.
            warn!(error = %e, "discarding torn gc commit marker");
            fs::remove_file(&marker_path)?;
            discard_temp_files(pages_dir);
            return Ok(false);
        }
    };

    info!(epoch = manifest.epoch, "completing interrupted gc");

    for order in Order::ALL {
        let tmp_path = pages_dir.join(format!("{}.tmp", order.file_name()));
        if tmp_path.exists() {
            fs::rename(&tmp_path, pages_dir.join(order.file_name()))?;
        }
    }
    fsync_dir(pages_dir)?;

    manifest.store(pages_dir)?;
    remove_marker(pages_dir)?;
    Ok(true)
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn write_marker(manifest: &Manifest, pages_dir: &Path) -> Result<(), GcError> {
    let bytes = serde_json::to_vec(manifest)
        .map_err(|e| GcError::Manifest(ManifestError::Json(e)))?;
    let marker_path = pages_dir.join(GC_COMMIT_FILENAME);
    let tmp_path = pages_dir.join(format!("{GC_COMMIT_FILENAME}.tmp"));
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(&bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, &marker_path)?;
    fsync_dir(pages_dir)?;
    Ok(())
}

fn remove_marker(pages_dir: &Path) -> Result<(), GcError> {
    match fs::remove_file(pages_dir.join(GC_COMMIT_FILENAME)) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(GcError::Io(e)),
    }
    fsync_dir(pages_dir)?;
    Ok(())
}

fn discard_temp_files(pages_dir: &Path) {
    for order in Order::ALL {
        let tmp_path = pages_dir.join(format!("{}.tmp", order.file_name()));
        if tmp_path.exists()
            && let Err(e) = fs::remove_file(&tmp_path)
        {
            warn!(path = %tmp_path.display(), error = %e, "failed to remove stale gc temp file");
        }
    }
}

/// Rewrites a page's next-link and checksum in place.
fn relink_page(
    page: &mut [u8],
    order: Order,
    offset: u64,
    next: Option<u64>,
) -> Result<(), GcError> {
    let header = PageHeader::decode(page).map_err(|reason| PageError::Corrupt {
        order: order.name(),
        offset,
        reason,
    })?;

    let relinked = PageHeader {
        next: next.unwrap_or(NO_NEXT),
        crc: 0,
        ..header
    };
    let mut header_bytes = relinked
        .encode()
        .map_err(|e| GcError::Page(PageError::Encoding(e)))?;

    let body_end = PAGE_HEADER_SIZE + header.body_len as usize;
    let crc = page_crc(&header_bytes, &page[PAGE_HEADER_SIZE..body_end]);
    header_bytes[PAGE_HEADER_SIZE - 4..].copy_from_slice(&crc.to_le_bytes());

    page[..PAGE_HEADER_SIZE].copy_from_slice(&header_bytes);
    Ok(())
}
