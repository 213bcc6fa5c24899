//! # Storage Engine
//!
//! This module implements the **synchronous**, **crash-safe** core of the
//! database: a single-writer, snapshot-reader property-graph store over
//! subject–predicate–object facts.
//!
//! ## Design Overview
//!
//! Data lives in four layers, consulted together on every read:
//!
//! 1. **Staging** — the in-memory buffer of adds, deletes, and property
//!    writes pending the next flush, rebuilt from the WAL after a crash.
//! 2. **Paged indexes** — three immutable page files (SPO, POS, OSP)
//!    addressed through the manifest's page tables.
//! 3. **Tombstone set** — manifest-resident delete markers hiding triples
//!    wherever they physically remain.
//! 4. **Property store** — the side map of node/edge blobs.
//!
//! Writes go through the WAL first (BEGIN … COMMIT framing, or standalone
//! auto-commit records), then into staging.  [`Db::flush`] merges staging
//! into the page files, swaps a new manifest (epoch +1), persists the
//! property store and hotness counters, and resets the WAL.
//!
//! ## Concurrency Model
//!
//! All engine state sits behind a single `Arc<RwLock<DbInner>>`.  Reads
//! take the read lock; writes, flushes, compaction, and GC take the write
//! lock.  Hotness counters, the snapshot tracker, and the reader registry
//! keep their own interior locks so queries can update them under the
//! read lock.  Cross-process coordination goes through the advisory file
//! lock and the reader registry, never shared memory.
//!
//! ## Guarantees
//!
//! - **Durability:** `commit_tx_durable` fsyncs the WAL before returning;
//!   `flush` commits via the atomic manifest swap.
//! - **Crash recovery:** on open the WAL is replayed (atomic transaction
//!   framing respected, torn tails truncated) on top of the last
//!   manifest.
//! - **Snapshot reads:** a pinned epoch observes a frozen manifest and
//!   page image regardless of concurrent flushes, compactions, or GC.

pub mod query;

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeSet,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compaction::{self, CompactionConfig, CompactionError, CompactionStats};
use crate::dictionary::{Dictionary, DictionaryError};
use crate::gc::{self, GcError, GcOutcome};
use crate::hotness::{Hotness, HotnessError};
use crate::lockfile::{LockError, LockFile};
use crate::manifest::{Manifest, ManifestError};
use crate::mvcc::SnapshotTracker;
use crate::pages::{Codec, PageError, PageFile, DEFAULT_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::props::{PropertyStore, PropsError};
use crate::readers::{ReaderRegistry, ReaderRegistryError};
use crate::staging::Staging;
use crate::triple::{Order, Triple};
use crate::wal::{self, TxRegistry, Wal, WalError, WalEvent};

pub use query::{Fact, FactPattern, SnapshotHandle, StreamQuery};

/// Marker-file magic at `<db>`.
const DB_MAGIC: &[u8; 4] = b"TRIA";

/// Marker-file format version.
const DB_FORMAT_VERSION: u32 = 1;

/// Txid registry file name inside the pages directory.
const TXIDS_FILENAME: &str = "txids.json";

// ------------------------------------------------------------------------------------------------
// Errors
// ------------------------------------------------------------------------------------------------

/// Top-level error type for engine operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Another writer holds the advisory lock.
    #[error("database is locked by another writer")]
    WriterLocked,

    /// Manifest parse or checksum failure — fatal for the database.
    #[error("Corrupt manifest: {0}")]
    Manifest(#[from] ManifestError),

    /// WAL failure outside the tolerated corruption-truncation path.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Page integrity or I/O failure.
    #[error("Page error: {0}")]
    Page(#[from] PageError),

    /// Dictionary failure (corrupt entry or exhausted id space).
    #[error("Dictionary error: {0}")]
    Dictionary(#[from] DictionaryError),

    /// Property-store failure.
    #[error("Property store error: {0}")]
    Props(#[from] PropsError),

    /// Compaction failure.
    #[error("Compaction error: {0}")]
    Compaction(#[from] CompactionError),

    /// GC failure.
    #[error("GC error: {0}")]
    Gc(#[from] GcError),

    /// Reader-registry failure.
    #[error("Reader registry error: {0}")]
    Readers(#[from] ReaderRegistryError),

    /// Hotness persistence failure.
    #[error("Hotness error: {0}")]
    Hotness(#[from] HotnessError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<LockError> for DbError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::AlreadyLocked => DbError::WriterLocked,
            LockError::Io(e) => DbError::Io(e),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Db`] instance, passed to [`Db::open`].
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Page size in bytes for a freshly-created database.  An existing
    /// database keeps the page size recorded in its manifest.
    pub page_size: usize,

    /// Page codec for newly-written pages.
    pub compression: Codec,

    /// Acquire the exclusive advisory write lock.
    pub enable_lock: bool,

    /// Advertise pinned snapshots in the cross-process reader registry.
    pub register_reader: bool,

    /// Keep a persistent registry of applied transaction ids and skip
    /// re-delivered transactions during replay.
    pub persistent_tx_dedupe: bool,

    /// Capacity of the txid registry (FIFO eviction beyond it).
    pub max_remember_tx_ids: usize,

    /// Reader entries older than this are considered stale.
    pub reader_stale_ms: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            compression: Codec::None,
            enable_lock: true,
            register_reader: true,
            persistent_tx_dedupe: false,
            max_remember_tx_ids: 1024,
            reader_stale_ms: 30_000,
        }
    }
}

/// Snapshot of engine statistics returned by [`Db::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbStats {
    /// Current epoch.
    pub epoch: u64,

    /// Staged fact operations pending flush.
    pub staged_ops: usize,

    /// Tombstones in the current manifest.
    pub tombstones: usize,

    /// Referenced pages per ordering (SPO, POS, OSP).
    pub pages: [usize; 3],

    /// Orphan pages per ordering.
    pub orphans: [usize; 3],

    /// Interned dictionary strings.
    pub dictionary_len: usize,

    /// Stored property blobs (nodes + edges).
    pub props_len: usize,
}

// ------------------------------------------------------------------------------------------------
// Paths
// ------------------------------------------------------------------------------------------------

/// Filesystem layout derived from the database base path.
#[derive(Debug, Clone)]
pub(crate) struct DbPaths {
    /// Marker file (the base path itself).
    pub marker: PathBuf,

    /// `<db>.wal`
    pub wal: PathBuf,

    /// `<db>.pages/`
    pub pages_dir: PathBuf,

    /// `<db>.lock`
    pub lock: PathBuf,

    /// `<db>.dictionary`
    pub dictionary: PathBuf,
}

impl DbPaths {
    fn new(base: &Path) -> Self {
        let with_ext = |ext: &str| {
            let mut os = base.as_os_str().to_os_string();
            os.push(ext);
            PathBuf::from(os)
        };
        Self {
            marker: base.to_path_buf(),
            wal: with_ext(".wal"),
            pages_dir: with_ext(".pages"),
            lock: with_ext(".lock"),
            dictionary: with_ext(".dictionary"),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Engine state
// ------------------------------------------------------------------------------------------------

/// A transaction buffered between `begin_tx` and `commit_tx`.
#[derive(Debug, Default)]
struct OpenTx {
    events: Vec<WalEvent>,
    tx_id: Option<String>,
}

pub(crate) struct DbInner {
    /// Derived filesystem layout.
    pub(crate) paths: DbPaths,

    /// Open-time configuration.
    pub(crate) config: DbConfig,

    /// Authoritative in-memory copy of the current manifest.
    pub(crate) manifest: Manifest,

    /// Tombstone set mirroring `manifest.tombstones`.
    pub(crate) tombstones: BTreeSet<Triple>,

    /// String↔id dictionary.
    pub(crate) dictionary: Dictionary,

    /// Write-ahead log.
    wal: Wal,

    /// Pending operations since the last flush.
    pub(crate) staging: Staging,

    /// Durable property blobs (as of the last flush).
    pub(crate) props: PropertyStore,

    /// Writer-side page file handles, indexed by `Order::tag()`.
    files: [PageFile; 3],

    /// Access counters (interior lock: queries bump under the read lock).
    pub(crate) hotness: Mutex<Hotness>,

    /// Snapshot pin tracking.
    pub(crate) tracker: SnapshotTracker,

    /// Cross-process reader registry.
    pub(crate) registry: Mutex<ReaderRegistry>,

    /// Optional persistent txid dedup registry.
    tx_registry: Option<TxRegistry>,

    /// Currently open transaction, if any.
    open_tx: Option<OpenTx>,

    /// Held write lock (`None` when `enable_lock` is off).
    _lock: Option<LockFile>,
}

/// The database handle returned by [`Db::open`].
///
/// Thread-safe — clone to share across threads; all clones drive the same
/// underlying state.
pub struct Db {
    pub(crate) inner: Arc<RwLock<DbInner>>,
}

impl Clone for Db {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

impl Db {
    // ----------------------------------------------------------------
    // Open / close
    // ----------------------------------------------------------------

    /// Opens (or creates) the database rooted at `base`.
    ///
    /// Recovery sequence: finish any interrupted GC, load the manifest,
    /// load dictionary / property store / hotness, replay the WAL on top
    /// (atomic transactions, txid dedup), truncate any torn WAL tail.
    pub fn open(base: impl AsRef<Path>, config: DbConfig) -> Result<Self, DbError> {
        let paths = DbPaths::new(base.as_ref());

        if let Some(parent) = paths.marker.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all(&paths.pages_dir)?;
        write_marker_if_absent(&paths.marker)?;

        // 1. Exclusive writer lock, unless disabled.
        let lock = if config.enable_lock {
            Some(LockFile::acquire(&paths.lock)?)
        } else {
            None
        };

        // 2. Finish an interrupted GC before trusting the manifest.
        gc::recover(&paths.pages_dir)?;

        // 3. Manifest (or a fresh one).  Fatal when present but corrupt.
        let page_size = config.page_size.max(MIN_PAGE_SIZE);
        let manifest = match Manifest::load(&paths.pages_dir)? {
            Some(m) => {
                m.codec()?; // reject manifests naming codecs we lack
                m
            }
            None => Manifest::new(config.compression, page_size as u32),
        };
        let tombstones: BTreeSet<Triple> =
            manifest.tombstones.iter().map(|&k| Triple::from(k)).collect();

        // 4. Side state.
        let dictionary = Dictionary::open(&paths.dictionary)?;
        let props = PropertyStore::load(&paths.pages_dir)?;
        let hotness = Hotness::load(&paths.pages_dir);
        let registry = ReaderRegistry::open(
            &paths.pages_dir,
            Duration::from_millis(config.reader_stale_ms),
        )?;
        let mut tx_registry = config
            .persistent_tx_dedupe
            .then(|| TxRegistry::load(paths.pages_dir.join(TXIDS_FILENAME), config.max_remember_tx_ids));

        // 5. Replay the WAL on top of the manifest.
        let replay = wal::replay(&paths.wal, tx_registry.as_ref())?;
        let mut staging = Staging::new();
        let mut replayed_props = 0usize;
        for event in &replay.events {
            match event {
                WalEvent::AddTriple(t) => staging.add(*t),
                WalEvent::DeleteTriple(t) => staging.delete(*t),
                WalEvent::SetNodeProps { node, blob } => {
                    staging.set_node_props(*node, blob.clone());
                    replayed_props += 1;
                }
                WalEvent::SetEdgeProps { triple, blob } => {
                    staging.set_edge_props(*triple, blob.clone());
                    replayed_props += 1;
                }
            }
        }
        if let Some(reg) = tx_registry.as_mut() {
            for tx in &replay.committed_txs {
                if let Some(id) = &tx.id {
                    reg.remember(id.clone());
                }
            }
        }

        // Every id replayed from the WAL must resolve — a missing entry
        // means the dictionary lost state the WAL still references.
        for event in &replay.events {
            if let WalEvent::AddTriple(t) | WalEvent::DeleteTriple(t) = event {
                dictionary.resolve(t.s)?;
                dictionary.resolve(t.p)?;
                dictionary.resolve(t.o)?;
            }
        }

        // Anything beyond the safe offset is a discarded partial
        // transaction or a torn record; cut it before appending, or a
        // dangling BEGIN would swallow the new records.
        let mut wal = Wal::open(&paths.wal)?;
        if replay.safe_offset < wal.offset() {
            warn!(
                safe_offset = replay.safe_offset,
                end = wal.offset(),
                "truncating WAL tail past the committed prefix"
            );
            wal.truncate_to(replay.safe_offset)?;
        }

        // 6. Page file handles.
        let files = open_page_files(&paths.pages_dir)?;

        info!(
            base = %paths.marker.display(),
            epoch = manifest.epoch,
            staged = staging.len(),
            replayed_props,
            dedup_skipped = replay.deduplicated,
            "database opened"
        );

        let inner = DbInner {
            paths,
            config,
            manifest,
            tombstones,
            dictionary,
            wal,
            staging,
            props,
            files,
            hotness: Mutex::new(hotness),
            tracker: SnapshotTracker::new(),
            registry: Mutex::new(registry),
            tx_registry,
            open_tx: None,
            _lock: lock,
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
        })
    }

    /// Gracefully shuts down: aborts a dangling transaction, flushes
    /// staged state, and releases the write lock.
    pub fn close(&self) -> Result<(), DbError> {
        {
            let mut inner = self.write()?;
            if inner.open_tx.take().is_some() {
                warn!("open transaction at close, aborting");
                inner.wal.append_abort()?;
            }
        }
        self.flush()?;

        let mut inner = self.write()?;
        inner.wal.sync()?;
        inner.dictionary.sync()?;
        if let Ok(mut registry) = inner.registry.lock() {
            registry.deregister()?;
        }
        inner._lock = None;

        info!(base = %inner.paths.marker.display(), "database closed");
        Ok(())
    }

    // ----------------------------------------------------------------
    // Transactions
    // ----------------------------------------------------------------

    /// Opens an explicit transaction.
    ///
    /// Mutations until `commit_tx` are applied atomically: a crash before
    /// the commit record is durable discards all of them on replay.  Only
    /// one transaction may be open (single-writer model).
    pub fn begin_tx(
        &self,
        tx_id: Option<String>,
        session_id: Option<String>,
    ) -> Result<(), DbError> {
        let mut inner = self.write()?;
        if inner.open_tx.is_some() {
            return Err(DbError::Internal("transaction already open".into()));
        }
        inner.wal.append_begin(tx_id.clone(), session_id)?;
        inner.open_tx = Some(OpenTx {
            events: Vec::new(),
            tx_id,
        });
        Ok(())
    }

    /// Commits the open transaction (buffered — durable at the next
    /// durable commit, flush, or close).
    pub fn commit_tx(&self) -> Result<(), DbError> {
        self.commit_tx_inner(false)
    }

    /// Commits the open transaction and fsyncs the WAL: on return the
    /// whole transaction survives any crash.
    pub fn commit_tx_durable(&self) -> Result<(), DbError> {
        self.commit_tx_inner(true)
    }

    fn commit_tx_inner(&self, durable: bool) -> Result<(), DbError> {
        let mut inner = self.write()?;
        let Some(tx) = inner.open_tx.take() else {
            return Err(DbError::Internal("no open transaction".into()));
        };

        // Dictionary entries referenced by the transaction must be
        // durable no later than the commit record.
        if durable {
            inner.dictionary.sync()?;
            inner.wal.append_commit_durable()?;
        } else {
            inner.wal.append_commit()?;
        }

        for event in tx.events {
            apply_event(&mut inner.staging, event);
        }
        if let Some(id) = tx.tx_id
            && let Some(reg) = inner.tx_registry.as_mut()
        {
            reg.remember(id);
        }
        Ok(())
    }

    /// Discards the open transaction.
    pub fn abort_tx(&self) -> Result<(), DbError> {
        let mut inner = self.write()?;
        if inner.open_tx.take().is_none() {
            return Err(DbError::Internal("no open transaction".into()));
        }
        inner.wal.append_abort()?;
        Ok(())
    }

    // ----------------------------------------------------------------
    // Mutations
    // ----------------------------------------------------------------

    /// Adds a fact, interning its three strings.  Returns the ids.
    ///
    /// Outside a transaction the record is a standalone auto-commit.
    pub fn add_fact(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<(u32, u32, u32), DbError> {
        let mut inner = self.write()?;

        // Dictionary first, so replay sees strings before their ids.
        let s = inner.dictionary.intern(subject)?;
        let p = inner.dictionary.intern(predicate)?;
        let o = inner.dictionary.intern(object)?;
        let triple = Triple::new(s, p, o);

        inner.wal.append_add_triple(triple)?;
        inner.record_event(WalEvent::AddTriple(triple));
        Ok((s, p, o))
    }

    /// Deletes a fact (stages a tombstone).
    ///
    /// Unknown strings mean the fact cannot exist; the call is a no-op.
    pub fn delete_fact(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<(), DbError> {
        let mut inner = self.write()?;

        let (Some(s), Some(p), Some(o)) = (
            inner.dictionary.lookup(subject),
            inner.dictionary.lookup(predicate),
            inner.dictionary.lookup(object),
        ) else {
            return Ok(());
        };
        let triple = Triple::new(s, p, o);

        inner.wal.append_delete_triple(triple)?;
        inner.record_event(WalEvent::DeleteTriple(triple));
        Ok(())
    }

    /// Replaces the opaque property blob of a node.
    pub fn set_node_props(&self, node: u32, blob: &[u8]) -> Result<(), DbError> {
        let mut inner = self.write()?;
        inner.wal.append_set_node_props(node, blob)?;
        inner.record_event(WalEvent::SetNodeProps {
            node,
            blob: blob.to_vec(),
        });
        Ok(())
    }

    /// Replaces the opaque property blob of an edge.
    pub fn set_edge_props(&self, triple: Triple, blob: &[u8]) -> Result<(), DbError> {
        let mut inner = self.write()?;
        inner.wal.append_set_edge_props(triple, blob)?;
        inner.record_event(WalEvent::SetEdgeProps {
            triple,
            blob: blob.to_vec(),
        });
        Ok(())
    }

    /// Current property blob for a node (staged value wins).
    pub fn node_props(&self, node: u32) -> Result<Option<Vec<u8>>, DbError> {
        let inner = self.read()?;
        Ok(inner
            .staging
            .node_props(node)
            .or_else(|| inner.props.node(node))
            .map(<[u8]>::to_vec))
    }

    /// Current property blob for an edge (staged value wins).
    pub fn edge_props(&self, triple: Triple) -> Result<Option<Vec<u8>>, DbError> {
        let inner = self.read()?;
        Ok(inner
            .staging
            .edge_props(triple)
            .or_else(|| inner.props.edge(triple))
            .map(<[u8]>::to_vec))
    }

    // ----------------------------------------------------------------
    // Flush
    // ----------------------------------------------------------------

    /// Merges staged operations into the paged indexes and swaps a new
    /// manifest.  Returns the new epoch (unchanged for an empty flush).
    ///
    /// The swap is the commit point: a failure anywhere before it leaves
    /// the previous state fully intact and the WAL able to rebuild
    /// staging.
    pub fn flush(&self) -> Result<u64, DbError> {
        let mut inner = self.write()?;
        let inner = &mut *inner;

        if inner.open_tx.is_some() {
            return Err(DbError::Internal("flush inside open transaction".into()));
        }
        if inner.staging.is_empty() {
            debug!("flush: staging empty, no-op");
            return Ok(inner.manifest.epoch);
        }

        // Everything the new pages will reference must be durable first.
        inner.dictionary.sync()?;
        inner.wal.sync()?;

        let batch = inner.staging.drain();
        let page_size = inner.manifest.page_size as usize;
        let codec = inner.config.compression;

        // Working copy; installed only after the store succeeds.
        let mut manifest = inner.manifest.clone();
        let mut tombstones = inner.tombstones.clone();

        // Tombstones: deletes join the set, re-added triples leave it.
        for &t in &batch.deletes {
            tombstones.insert(t);
        }
        for &t in &batch.adds {
            tombstones.remove(&t);
        }

        // Merge staged adds into each ordering's chains.
        for order in Order::ALL {
            let file = &mut inner.files[order.tag() as usize];

            let mut by_primary: std::collections::BTreeMap<u32, Vec<Triple>> = Default::default();
            for &t in &batch.adds {
                by_primary.entry(order.primary(t)).or_default().push(t);
            }

            for (primary, staged) in by_primary {
                let old_offsets = manifest
                    .ordering(order)
                    .lookups
                    .get(&primary)
                    .cloned()
                    .unwrap_or_default();

                let existing = if old_offsets.is_empty() {
                    Vec::new()
                } else {
                    file.read_chain(primary, &old_offsets, page_size)?
                };

                // Set semantics under the updated tombstone set, sorted
                // by the ordering's key tuple.
                let mut merged: BTreeSet<(u32, u32)> = BTreeSet::new();
                let mut triples: Vec<Triple> = Vec::new();
                for t in existing.into_iter().chain(staged) {
                    if tombstones.contains(&t) {
                        continue;
                    }
                    if merged.insert(order.sort_key(t)) {
                        triples.push(t);
                    }
                }
                triples.sort_by_key(|&t| order.sort_key(t));

                let state = manifest.ordering_mut(order);
                if triples.is_empty() {
                    state.lookups.remove(&primary);
                } else {
                    let built =
                        crate::pages::build_chain(order, primary, &triples, page_size, codec, file.len())?;
                    file.append(&built.bytes)?;
                    state.lookups.insert(primary, built.offsets);
                }
                state.orphans.extend(old_offsets);
            }

            file.sync()?;
        }

        // Side state persisted before the swap.
        let mut props = std::mem::take(&mut inner.props);
        for (node, blob) in batch.node_props {
            props.set_node(node, blob);
        }
        for (triple, blob) in batch.edge_props {
            props.set_edge(triple, blob);
        }
        props.store(&inner.paths.pages_dir)?;
        inner.props = props;

        if let Ok(hotness) = inner.hotness.lock() {
            hotness.store(&inner.paths.pages_dir)?;
        }
        if let Some(reg) = inner.tx_registry.as_ref() {
            reg.persist()?;
        }

        // The atomic commit point.
        manifest.tombstones = tombstones.iter().map(|&t| t.into()).collect();
        manifest.codec = codec.name().to_string();
        manifest.wal_offset = 0;
        manifest.bump_epoch();
        manifest.store(&inner.paths.pages_dir)?;

        // The WAL prefix is fully absorbed.  A crash before this reset
        // merely replays it into staging again — set semantics make the
        // replay idempotent against the new pages.
        inner.wal.reset()?;

        inner.manifest = manifest;
        inner.tombstones = tombstones;

        info!(epoch = inner.manifest.epoch, "flush committed");
        Ok(inner.manifest.epoch)
    }

    // ----------------------------------------------------------------
    // Compaction & GC
    // ----------------------------------------------------------------

    /// Runs a compaction pass.  Returns its statistics; a pass that
    /// rewrote nothing leaves the epoch untouched.
    pub fn compact(&self, config: &CompactionConfig) -> Result<CompactionStats, DbError> {
        let stats = {
            let mut inner = self.write()?;
            let inner = &mut *inner;

            let mut manifest = inner.manifest.clone();
            let stats = {
                let hotness = inner
                    .hotness
                    .lock()
                    .map_err(|_| DbError::Internal("hotness lock poisoned".into()))?;
                let mut ctx = compaction::CompactionCtx {
                    manifest: &mut manifest,
                    files: &mut inner.files,
                    tombstones: &inner.tombstones,
                    hotness: &*hotness,
                    page_size: inner.manifest.page_size as usize,
                    codec: inner.config.compression,
                };
                compaction::run(&mut ctx, config)?
            };

            if stats.primaries_rewritten > 0 || stats.tombstones_cleared {
                for order in &config.orders {
                    inner.files[order.tag() as usize].sync()?;
                }
                manifest.bump_epoch();
                manifest.store(&inner.paths.pages_dir)?;

                inner.tombstones = manifest
                    .tombstones
                    .iter()
                    .map(|&k| Triple::from(k))
                    .collect();
                inner.manifest = manifest;
            }
            stats
        };

        if config.auto_gc {
            self.gc(true)?;
        }
        Ok(stats)
    }

    /// Reclaims orphan pages.
    ///
    /// With `respect_readers`, any active reader (this process or a
    /// cooperating one) pinned below the current epoch blocks the pass:
    /// the result is [`GcOutcome::Skipped`], not an error.
    pub fn gc(&self, respect_readers: bool) -> Result<GcOutcome, DbError> {
        let mut inner = self.write()?;
        let inner = &mut *inner;

        let has_orphans = Order::ALL
            .iter()
            .any(|&o| !inner.manifest.ordering(o).orphans.is_empty());
        if !has_orphans {
            return Ok(GcOutcome::Done(gc::GcStats::default()));
        }

        if respect_readers {
            let current = inner.manifest.epoch;

            let mut min_pinned: Option<u64> = inner.tracker.pinned_epoch();
            {
                let registry = inner
                    .registry
                    .lock()
                    .map_err(|_| DbError::Internal("registry lock poisoned".into()))?;
                for reader in registry.active_readers()? {
                    min_pinned = Some(min_pinned.map_or(reader.epoch, |m| m.min(reader.epoch)));
                }
            }

            if let Some(pinned) = min_pinned
                && pinned < current
            {
                debug!(pinned, current, "gc skipped: active readers below current epoch");
                return Ok(GcOutcome::Skipped {
                    reason: "active_readers",
                });
            }
        }

        let mut manifest = inner.manifest.clone();
        match gc::collect(&mut manifest, &mut inner.files, &inner.paths.pages_dir) {
            Ok(stats) => {
                inner.manifest = manifest;
                Ok(GcOutcome::Done(stats))
            }
            Err(e) => {
                // A commit marker on disk means the swap was already
                // decided; finish it now so this handle's view matches
                // the files before surfacing the error.  Without a
                // marker, recovery just discards the temp files.
                if gc::recover(&inner.paths.pages_dir)?
                    && let Some(recovered) = Manifest::load(&inner.paths.pages_dir)?
                {
                    for order in Order::ALL {
                        inner.files[order.tag() as usize].reopen()?;
                    }
                    inner.manifest = recovered;
                }
                Err(e.into())
            }
        }
    }

    // ----------------------------------------------------------------
    // Introspection
    // ----------------------------------------------------------------

    /// Current epoch.
    pub fn epoch(&self) -> Result<u64, DbError> {
        Ok(self.read()?.manifest.epoch)
    }

    /// Engine statistics.
    pub fn stats(&self) -> Result<DbStats, DbError> {
        let inner = self.read()?;
        let per_order = |f: fn(&crate::manifest::OrderingState) -> usize| {
            let mut out = [0usize; 3];
            for order in Order::ALL {
                out[order.tag() as usize] = f(inner.manifest.ordering(order));
            }
            out
        };
        Ok(DbStats {
            epoch: inner.manifest.epoch,
            staged_ops: inner.staging.len(),
            tombstones: inner.manifest.tombstones.len(),
            pages: per_order(|s| s.page_count()),
            orphans: per_order(|s| s.orphans.len()),
            dictionary_len: inner.dictionary.len(),
            props_len: inner.props.len(),
        })
    }

    // ----------------------------------------------------------------
    // Lock plumbing
    // ----------------------------------------------------------------

    pub(crate) fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, DbInner>, DbError> {
        self.inner
            .read()
            .map_err(|_| DbError::Internal("RwLock poisoned".into()))
    }

    pub(crate) fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, DbInner>, DbError> {
        self.inner
            .write()
            .map_err(|_| DbError::Internal("RwLock poisoned".into()))
    }
}

impl DbInner {
    /// Routes a mutation into the open transaction buffer or, outside a
    /// transaction, applies it to staging immediately (auto-commit).
    fn record_event(&mut self, event: WalEvent) {
        match self.open_tx.as_mut() {
            Some(tx) => tx.events.push(event),
            None => apply_event(&mut self.staging, event),
        }
    }
}

fn apply_event(staging: &mut Staging, event: WalEvent) {
    match event {
        WalEvent::AddTriple(t) => staging.add(t),
        WalEvent::DeleteTriple(t) => staging.delete(t),
        WalEvent::SetNodeProps { node, blob } => staging.set_node_props(node, blob),
        WalEvent::SetEdgeProps { triple, blob } => staging.set_edge_props(triple, blob),
    }
}

fn open_page_files(pages_dir: &Path) -> Result<[PageFile; 3], DbError> {
    Ok([
        PageFile::open(pages_dir, Order::Spo)?,
        PageFile::open(pages_dir, Order::Pos)?,
        PageFile::open(pages_dir, Order::Osp)?,
    ])
}

fn write_marker_if_absent(path: &Path) -> Result<(), DbError> {
    if path.exists() {
        return Ok(());
    }
    let mut f = fs::File::create(path)?;
    f.write_all(DB_MAGIC)?;
    f.write_all(&DB_FORMAT_VERSION.to_le_bytes())?;
    f.sync_all()?;
    Ok(())
}
