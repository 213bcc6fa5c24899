//! # Manifest Component
//!
//! The **manifest** is the central metadata authority for the database.
//! It is a single JSON document (`manifest.json` inside the pages
//! directory) carrying everything a reader needs to resolve a consistent
//! snapshot:
//!
//! - schema version and current epoch,
//! - the database-wide page codec and page size,
//! - per-ordering page tables (`primary → chain offsets`) and orphan
//!   page lists,
//! - the tombstone set,
//! - the durable WAL offset absorbed by the last flush,
//! - a CRC32 checksum over the whole document.
//!
//! ## Atomic swap
//!
//! The manifest is replaced, never edited: write `manifest.json.tmp`,
//! fsync it, rename over `manifest.json`, fsync the parent directory.
//! Readers resolve the current manifest with a plain open+read — the
//! rename-only replace policy guarantees they always see a complete
//! document.
//!
//! ## Corruption
//!
//! A manifest that fails to parse or whose checksum does not match is
//! fatal for the database ([`ManifestError::ChecksumMismatch`] /
//! [`ManifestError::Json`], surfaced by the engine as `CorruptManifest`).
//! Unlike the WAL, there is no safe prefix to fall back to.

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Write},
    path::Path,
};

use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::pages::Codec;
use crate::triple::{Order, Triple};

/// Manifest file name inside the pages directory.
pub const MANIFEST_FILENAME: &str = "manifest.json";

const MANIFEST_TMP_SUFFIX: &str = ".tmp";

/// Current manifest schema version.
pub const MANIFEST_VERSION: u32 = 1;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialisation / parse failure.
    #[error("Manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Document checksum did not match its contents.
    #[error("Manifest checksum mismatch")]
    ChecksumMismatch,

    /// The manifest names a codec this build does not know.
    #[error("Manifest names unknown codec {0:?}")]
    UnknownCodec(String),
}

// ------------------------------------------------------------------------------------------------
// Document structures
// ------------------------------------------------------------------------------------------------

/// Per-ordering slice of the manifest: the page table and orphan list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingState {
    /// Page table: primary id → chain page offsets, in chain order.
    pub lookups: BTreeMap<u32, Vec<u64>>,

    /// Offsets of pages on disk no longer referenced by `lookups`.
    pub orphans: Vec<u64>,
}

impl OrderingState {
    /// Total number of pages referenced by the page table.
    pub fn page_count(&self) -> usize {
        self.lookups.values().map(Vec::len).sum()
    }
}

/// The three per-ordering states, keyed the way the JSON document spells
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orderings {
    #[serde(rename = "SPO")]
    pub spo: OrderingState,

    #[serde(rename = "POS")]
    pub pos: OrderingState,

    #[serde(rename = "OSP")]
    pub osp: OrderingState,
}

/// The manifest document.
///
/// Mutations happen on an in-memory copy which is then swapped in
/// atomically via [`Manifest::store`]; the previous document stays intact
/// until the rename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema version.
    pub version: u32,

    /// Epoch this manifest was written at.
    pub epoch: u64,

    /// Database-wide page codec name.
    pub codec: String,

    /// Page size in bytes.
    pub page_size: u32,

    /// Durable WAL offset absorbed by the flush that wrote this manifest.
    pub wal_offset: u64,

    /// Per-ordering page tables and orphan lists.
    pub orderings: Orderings,

    /// Logically-deleted triples as `[s, p, o]` keys.
    pub tombstones: Vec<[u32; 3]>,

    /// CRC32 over the serialised document with this field zeroed.
    pub checksum: u32,
}

impl Manifest {
    /// Creates the manifest of an empty database.
    pub fn new(codec: Codec, page_size: u32) -> Self {
        Self {
            version: MANIFEST_VERSION,
            epoch: 0,
            codec: codec.name().to_string(),
            page_size,
            wal_offset: 0,
            orderings: Orderings::default(),
            tombstones: Vec::new(),
            checksum: 0,
        }
    }

    /// Parses the codec name, failing on tags this build does not ship.
    pub fn codec(&self) -> Result<Codec, ManifestError> {
        Codec::from_name(&self.codec).ok_or_else(|| ManifestError::UnknownCodec(self.codec.clone()))
    }

    /// Borrows the state of one ordering.
    pub fn ordering(&self, order: Order) -> &OrderingState {
        match order {
            Order::Spo => &self.orderings.spo,
            Order::Pos => &self.orderings.pos,
            Order::Osp => &self.orderings.osp,
        }
    }

    /// Mutably borrows the state of one ordering.
    pub fn ordering_mut(&mut self, order: Order) -> &mut OrderingState {
        match order {
            Order::Spo => &mut self.orderings.spo,
            Order::Pos => &mut self.orderings.pos,
            Order::Osp => &mut self.orderings.osp,
        }
    }

    /// Returns `true` when `t` is masked by the tombstone set.
    pub fn is_tombstoned(&self, t: Triple) -> bool {
        let key: [u32; 3] = t.into();
        self.tombstones.contains(&key)
    }

    /// Advances the epoch by one.  Called by every successful flush,
    /// compaction, and GC before the swap.
    pub fn bump_epoch(&mut self) {
        self.epoch += 1;
    }

    // --------------------------------------------------------------------
    // Persistence
    // --------------------------------------------------------------------

    /// Loads the manifest from `dir`, or `Ok(None)` for a fresh database.
    pub fn load(dir: &Path) -> Result<Option<Self>, ManifestError> {
        let path = dir.join(MANIFEST_FILENAME);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ManifestError::Io(e)),
        };

        let manifest: Manifest = serde_json::from_slice(&raw)?;

        // Verify checksum: re-serialise with the checksum zeroed, CRC the
        // bytes, compare.
        let mut verify = manifest.clone();
        verify.checksum = 0;
        let verify_bytes = serde_json::to_vec(&verify)?;
        let mut hasher = Crc32::new();
        hasher.update(&verify_bytes);
        if hasher.finalize() != manifest.checksum {
            return Err(ManifestError::ChecksumMismatch);
        }

        debug!(
            epoch = manifest.epoch,
            tombstones = manifest.tombstones.len(),
            "manifest loaded"
        );
        Ok(Some(manifest))
    }

    /// Writes the manifest atomically into `dir`.
    ///
    /// Steps: serialise with a fresh checksum, write `manifest.json.tmp`,
    /// fsync, rename to `manifest.json`, fsync the directory.  Updates
    /// `self.checksum` to the stored value.
    pub fn store(&mut self, dir: &Path) -> Result<(), ManifestError> {
        self.checksum = 0;
        let unchecked_bytes = serde_json::to_vec(self)?;
        let mut hasher = Crc32::new();
        hasher.update(&unchecked_bytes);
        self.checksum = hasher.finalize();

        let bytes = serde_json::to_vec(self)?;

        let tmp_path = dir.join(format!("{MANIFEST_FILENAME}{MANIFEST_TMP_SUFFIX}"));
        {
            let mut f = File::create(&tmp_path)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }

        let final_path = dir.join(MANIFEST_FILENAME);
        fs::rename(&tmp_path, &final_path)?;
        fsync_dir(dir)?;

        info!(epoch = self.epoch, path = %final_path.display(), "manifest stored");
        Ok(())
    }
}

/// Fsyncs a directory so a rename inside it is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), io::Error> {
    File::open(dir)?.sync_all()
}
