//! # Staging Module
//!
//! The staging buffer is the single-writer, in-memory set of operations
//! pending the next flush: fact insertions, fact deletions (tombstones),
//! and node/edge property writes.
//!
//! ## Design Invariants
//!
//! - Every staged operation is WAL-first: the engine appends the WAL
//!   record before mutating the buffer, so a crash before flush loses
//!   nothing — WAL replay rebuilds exactly this state.
//! - Adds and deletes carry **set semantics**: staging an add cancels a
//!   staged delete of the same triple and vice versa.  The buffer never
//!   holds both for one key.
//! - Property writes are last-writer-wins per node id / edge triple.
//! - Staging participates in query results: scans merge the buffer with
//!   paged content under the visible tombstone set.
//!
//! ## Flush Semantics
//!
//! [`Staging::drain`] hands the accumulated batch to the flush path and
//! empties the buffer in the same motion.  The contract is deliberately
//! small (`add` / `delete` / `drain` / `len`) so that a segment-keeping
//! variant could replace this buffer without touching the engine.

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet};

use crate::triple::{Triple, TriplePattern};

// ------------------------------------------------------------------------------------------------
// Staged batch
// ------------------------------------------------------------------------------------------------

/// Everything accumulated since the last flush, detached from the buffer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StagedBatch {
    /// Triples to insert.
    pub adds: BTreeSet<Triple>,

    /// Triples to tombstone.
    pub deletes: BTreeSet<Triple>,

    /// Node property blobs to persist.
    pub node_props: BTreeMap<u32, Vec<u8>>,

    /// Edge property blobs to persist.
    pub edge_props: BTreeMap<Triple, Vec<u8>>,
}

impl StagedBatch {
    /// Returns `true` when the batch holds no operations.
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty()
            && self.deletes.is_empty()
            && self.node_props.is_empty()
            && self.edge_props.is_empty()
    }
}

// ------------------------------------------------------------------------------------------------
// Staging buffer
// ------------------------------------------------------------------------------------------------

/// In-memory buffer of operations pending the next flush.
#[derive(Debug, Default)]
pub struct Staging {
    batch: StagedBatch,
}

impl Staging {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a fact insertion.
    ///
    /// Cancels a staged delete of the same triple: within one flush window
    /// the later operation wins.
    pub fn add(&mut self, t: Triple) {
        self.batch.deletes.remove(&t);
        self.batch.adds.insert(t);
    }

    /// Stages a fact deletion.
    ///
    /// Cancels a staged add of the same triple.
    pub fn delete(&mut self, t: Triple) {
        self.batch.adds.remove(&t);
        self.batch.deletes.insert(t);
    }

    /// Stages a node property write (last writer wins).
    pub fn set_node_props(&mut self, node: u32, blob: Vec<u8>) {
        self.batch.node_props.insert(node, blob);
    }

    /// Stages an edge property write (last writer wins).
    pub fn set_edge_props(&mut self, triple: Triple, blob: Vec<u8>) {
        self.batch.edge_props.insert(triple, blob);
    }

    /// Number of staged fact operations (adds + deletes).
    pub fn len(&self) -> usize {
        self.batch.adds.len() + self.batch.deletes.len()
    }

    /// Returns `true` when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Returns `true` when `t` is staged for insertion.
    pub fn has_add(&self, t: Triple) -> bool {
        self.batch.adds.contains(&t)
    }

    /// Returns `true` when `t` is staged for deletion.
    pub fn has_delete(&self, t: Triple) -> bool {
        self.batch.deletes.contains(&t)
    }

    /// Staged node property blob, if any.
    pub fn node_props(&self, node: u32) -> Option<&[u8]> {
        self.batch.node_props.get(&node).map(Vec::as_slice)
    }

    /// Staged edge property blob, if any.
    pub fn edge_props(&self, triple: Triple) -> Option<&[u8]> {
        self.batch.edge_props.get(&triple).map(Vec::as_slice)
    }

    /// Iterates staged adds matching `pattern`.
    pub fn matching_adds<'a>(
        &'a self,
        pattern: &'a TriplePattern,
    ) -> impl Iterator<Item = Triple> + 'a {
        self.batch
            .adds
            .iter()
            .copied()
            .filter(move |t| pattern.matches(*t))
    }

    /// Detaches and returns the whole batch, leaving the buffer empty.
    ///
    /// Cleared atomically with flush: the caller swaps the manifest first
    /// and only then drops the batch it drained.
    pub fn drain(&mut self) -> StagedBatch {
        std::mem::take(&mut self.batch)
    }

    /// Read-only view of the current batch.
    pub fn batch(&self) -> &StagedBatch {
        &self.batch
    }
}
