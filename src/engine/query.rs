//! Query execution — point/range queries, streaming cursors, snapshots.
//!
//! Every read pins an epoch through the snapshot tracker: the first pin
//! resolves the current manifest into an immutable [`Snapshot`]
//! (manifest clone + page-file maps) and registers the process in the
//! reader registry; queries started while an epoch is pinned reuse it
//! without re-reading the manifest; the last unpin deregisters.
//!
//! A query merges three sources under the pinned tombstone set:
//!
//! 1. the scanned ordering's page chains (hotness is bumped per visited
//!    chain),
//! 2. staged adds (writer-local, outside the repeatability guarantee),
//! 3. minus staged deletes.
//!
//! The ordering to scan follows the pattern's bound components, with an
//! optional caller hint (honoured when its primary is bound).

use std::{
    collections::{BTreeSet, VecDeque},
    sync::Arc,
};

use tracing::warn;

use super::{Db, DbError, DbInner};
use crate::mvcc::Snapshot;
use crate::triple::{Order, Triple, TriplePattern};

// ------------------------------------------------------------------------------------------------
// External pattern & fact types
// ------------------------------------------------------------------------------------------------

/// A fact in external (string) form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Fact {
    /// Subject string.
    pub subject: String,

    /// Predicate string.
    pub predicate: String,

    /// Object string.
    pub object: String,
}

impl Fact {
    /// Creates a fact from its three strings.
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

/// A partial fact pattern in external (string) form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactPattern {
    /// Subject to match, or wildcard.
    pub subject: Option<String>,

    /// Predicate to match, or wildcard.
    pub predicate: Option<String>,

    /// Object to match, or wildcard.
    pub object: Option<String>,

    /// Preferred index ordering for the scan.
    pub order_hint: Option<Order>,
}

impl FactPattern {
    /// Pattern matching every fact.
    pub fn any() -> Self {
        Self::default()
    }

    /// Pattern bound on the subject.
    pub fn with_subject(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            ..Self::default()
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Pin plumbing
// ------------------------------------------------------------------------------------------------

impl Db {
    /// Pins the current epoch, resolving a snapshot when none is pinned.
    pub(crate) fn pin(&self) -> Result<Arc<Snapshot>, DbError> {
        let inner = self.read()?;
        let (snapshot, initial) = inner.tracker.pin_with(|| {
            Snapshot::open(&inner.paths.pages_dir, inner.manifest.clone())
        })?;

        if initial && inner.config.register_reader {
            let mut registry = inner
                .registry
                .lock()
                .map_err(|_| DbError::Internal("registry lock poisoned".into()))?;
            registry.register(snapshot.epoch())?;
        }
        Ok(snapshot)
    }

    /// Releases one pin; on the last release the reader entry is removed.
    /// Errors are logged, not surfaced — unpin runs on drop paths.
    pub(crate) fn unpin_quiet(&self) {
        let Ok(inner) = self.read() else {
            return;
        };
        if inner.tracker.unpin().is_some()
            && let Ok(mut registry) = inner.registry.lock()
            && let Err(e) = registry.deregister()
        {
            warn!(error = %e, "failed to remove reader entry");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Query execution
// ------------------------------------------------------------------------------------------------

impl Db {
    /// Runs a query and returns the matching facts, sorted by their
    /// canonical triple key.
    ///
    /// A bound string unknown to the dictionary cannot match anything;
    /// the result is empty without touching the indexes.
    pub fn query(&self, pattern: &FactPattern) -> Result<Vec<Fact>, DbError> {
        let snapshot = self.pin()?;
        let result = (|| {
            let inner = self.read()?;
            let Some(id_pattern) = resolve_pattern(&inner, pattern) else {
                return Ok(Vec::new());
            };
            let triples = run_query(&inner, &snapshot, &id_pattern)?;
            triples
                .into_iter()
                .map(|t| fact_from_triple(&inner, t))
                .collect()
        })();
        self.unpin_quiet();
        result
    }

    /// Id-level variant of [`Db::query`].
    pub fn query_ids(&self, pattern: &TriplePattern) -> Result<Vec<Triple>, DbError> {
        let snapshot = self.pin()?;
        let result = (|| {
            let inner = self.read()?;
            run_query(&inner, &snapshot, pattern)
        })();
        self.unpin_quiet();
        result
    }

    /// Opens a lazy, restartable cursor over the matching facts.
    ///
    /// The cursor pins the epoch for its whole lifetime; dropping it
    /// cancels the query and releases the pin.
    pub fn stream_query(&self, pattern: &FactPattern) -> Result<StreamQuery, DbError> {
        let snapshot = self.pin()?;
        let setup = (|| {
            let inner = self.read()?;
            let Some(id_pattern) = resolve_pattern(&inner, pattern) else {
                return Ok(None);
            };
            Ok(Some(StreamState::prepare(&inner, &snapshot, &id_pattern)))
        })();

        match setup {
            Ok(state) => Ok(StreamQuery {
                db: self.clone(),
                snapshot,
                state: state.clone(),
                initial: state,
                buffer: VecDeque::new(),
            }),
            Err(e) => {
                self.unpin_quiet();
                Err(e)
            }
        }
    }

    /// Pins the current epoch and returns a handle that keeps it pinned
    /// until dropped.  Queries issued while the handle lives observe the
    /// same epoch.
    pub fn snapshot(&self) -> Result<SnapshotHandle, DbError> {
        let snapshot = self.pin()?;
        Ok(SnapshotHandle {
            db: self.clone(),
            snapshot,
        })
    }
}

/// Resolves a string pattern to ids.  `None` when a bound string is not
/// interned (nothing can match).
fn resolve_pattern(inner: &DbInner, pattern: &FactPattern) -> Option<TriplePattern> {
    let bind = |name: &Option<String>| -> Option<Option<u32>> {
        match name {
            None => Some(None),
            Some(s) => inner.dictionary.lookup(s).map(Some),
        }
    };
    Some(TriplePattern {
        s: bind(&pattern.subject)?,
        p: bind(&pattern.predicate)?,
        o: bind(&pattern.object)?,
        order_hint: pattern.order_hint,
    })
}

/// Maps a triple back to strings.
fn fact_from_triple(inner: &DbInner, t: Triple) -> Result<Fact, DbError> {
    Ok(Fact {
        subject: inner.dictionary.resolve(t.s)?.to_string(),
        predicate: inner.dictionary.resolve(t.p)?.to_string(),
        object: inner.dictionary.resolve(t.o)?.to_string(),
    })
}

/// Core scan: pages (visible under the pinned tombstone set) merged with
/// staging.
fn run_query(
    inner: &DbInner,
    snapshot: &Snapshot,
    pattern: &TriplePattern,
) -> Result<Vec<Triple>, DbError> {
    let order = pattern.scan_order();
    let mut results: BTreeSet<Triple> = BTreeSet::new();

    let primaries: Vec<u32> = match pattern.bound_primary(order) {
        Some(primary) => vec![primary],
        None => snapshot.primaries(order).collect(),
    };

    {
        let mut hotness = inner
            .hotness
            .lock()
            .map_err(|_| DbError::Internal("hotness lock poisoned".into()))?;
        for &primary in &primaries {
            if !snapshot.has_chain(order, primary) {
                continue;
            }
            hotness.record(order, primary);
            for t in snapshot.chain(order, primary)? {
                if snapshot.is_tombstoned(t) || inner.staging.has_delete(t) {
                    continue;
                }
                if pattern.matches(t) {
                    results.insert(t);
                }
            }
        }
    }

    // Staged adds participate; the manifest tombstone set masks staging
    // and pages alike.
    for t in inner.staging.matching_adds(pattern) {
        if !snapshot.is_tombstoned(t) {
            results.insert(t);
        }
    }

    Ok(results.into_iter().collect())
}

// ------------------------------------------------------------------------------------------------
// Streaming cursor
// ------------------------------------------------------------------------------------------------

/// Frozen inputs of a streaming query, kept for `rewind`.
#[derive(Debug, Clone)]
struct StreamState {
    pattern: TriplePattern,
    order: Order,
    primaries: VecDeque<u32>,
    staged: BTreeSet<Triple>,
    staged_deletes: BTreeSet<Triple>,
}

impl StreamState {
    fn prepare(inner: &DbInner, snapshot: &Snapshot, pattern: &TriplePattern) -> Self {
        let order = pattern.scan_order();
        let primaries: VecDeque<u32> = match pattern.bound_primary(order) {
            Some(primary) => VecDeque::from([primary]),
            None => snapshot.primaries(order).collect(),
        };

        // Staging is captured at cursor creation so iteration is
        // repeatable even while the writer keeps going.
        let staged: BTreeSet<Triple> = inner
            .staging
            .matching_adds(pattern)
            .filter(|&t| !snapshot.is_tombstoned(t))
            .collect();
        let staged_deletes = inner.staging.batch().deletes.clone();

        Self {
            pattern: *pattern,
            order,
            primaries,
            staged,
            staged_deletes,
        }
    }
}

/// Lazy, restartable, cancellable query cursor.
///
/// Yields facts primary-by-primary; dropping the cursor releases the
/// pinned epoch (in-flight page reads are simply discarded).
pub struct StreamQuery {
    db: Db,
    snapshot: Arc<Snapshot>,

    /// Live iteration state (`None` when a bound string was unknown —
    /// the stream is empty).
    state: Option<StreamState>,

    /// Pristine copy for [`StreamQuery::rewind`].
    initial: Option<StreamState>,

    /// Decoded triples waiting to be yielded.
    buffer: VecDeque<Triple>,
}

impl StreamQuery {
    /// Epoch this cursor observes.
    pub fn epoch(&self) -> u64 {
        self.snapshot.epoch()
    }

    /// Restarts the cursor from the beginning of the same snapshot.
    pub fn rewind(&mut self) {
        self.state = self.initial.clone();
        self.buffer.clear();
    }

    /// Fills the buffer from the next non-empty chain.  Returns `false`
    /// when the stream is exhausted.
    fn fill(&mut self) -> Result<bool, DbError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(false);
        };

        while self.buffer.is_empty() {
            let Some(primary) = state.primaries.pop_front() else {
                // Chains exhausted: emit staged adds whose primaries had
                // no chain (the rest were merged during chain visits).
                if state.staged.is_empty() {
                    return Ok(false);
                }
                self.buffer.extend(std::mem::take(&mut state.staged));
                continue;
            };

            let inner = self.db.read()?;
            let mut emitted: BTreeSet<Triple> = BTreeSet::new();

            if self.snapshot.has_chain(state.order, primary) {
                if let Ok(mut hotness) = inner.hotness.lock() {
                    hotness.record(state.order, primary);
                }
                for t in self.snapshot.chain(state.order, primary)? {
                    if self.snapshot.is_tombstoned(t)
                        || state.staged_deletes.contains(&t)
                        || !state.pattern.matches(t)
                    {
                        continue;
                    }
                    emitted.insert(t);
                }
            }

            // Merge staged adds grouped under this primary.
            let staged_here: Vec<Triple> = state
                .staged
                .iter()
                .copied()
                .filter(|&t| state.order.primary(t) == primary)
                .collect();
            for t in staged_here {
                state.staged.remove(&t);
                emitted.insert(t);
            }

            self.buffer.extend(emitted);
        }
        Ok(true)
    }
}

impl Iterator for StreamQuery {
    type Item = Result<Fact, DbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            match self.fill() {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
        let t = self.buffer.pop_front()?;
        let result = self
            .db
            .read()
            .and_then(|inner| fact_from_triple(&inner, t));
        Some(result)
    }
}

impl Drop for StreamQuery {
    fn drop(&mut self) {
        self.db.unpin_quiet();
    }
}

impl std::fmt::Debug for StreamQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamQuery")
            .field("epoch", &self.snapshot.epoch())
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

// ------------------------------------------------------------------------------------------------
// Snapshot handle
// ------------------------------------------------------------------------------------------------

/// A held snapshot pin.
///
/// While alive, every query on the database reuses this pinned epoch, so
/// repeated queries return identical sets no matter what the writer
/// does.  Dropping the handle releases the pin (and the reader entry,
/// when this was the last one).
pub struct SnapshotHandle {
    db: Db,
    snapshot: Arc<Snapshot>,
}

impl SnapshotHandle {
    /// The pinned epoch.
    pub fn epoch(&self) -> u64 {
        self.snapshot.epoch()
    }

    /// Runs a query against the pinned snapshot.
    pub fn query(&self, pattern: &FactPattern) -> Result<Vec<Fact>, DbError> {
        self.db.query(pattern)
    }

    /// Id-level query against the pinned snapshot.
    pub fn query_ids(&self, pattern: &TriplePattern) -> Result<Vec<Triple>, DbError> {
        self.db.query_ids(pattern)
    }
}

impl Drop for SnapshotHandle {
    fn drop(&mut self) {
        self.db.unpin_quiet();
    }
}

impl std::fmt::Debug for SnapshotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotHandle")
            .field("epoch", &self.snapshot.epoch())
            .finish_non_exhaustive()
    }
}
