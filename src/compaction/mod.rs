//! # Compaction Module
//!
//! Compaction rewrites page chains to squeeze out duplicates and
//! tombstoned triples, emitting a fresh page table that references the
//! rewritten pages.  Old pages become orphans, reclaimed later by GC.
//!
//! Two modes share the chain-rewrite plumbing:
//!
//! ## Full compaction
//!
//! Rewrites **every** primary of the selected orderings.  When one full
//! pass covers all three orderings, no page anywhere can still hold a
//! masked triple afterwards, so the tombstone set is cleared; any
//! narrower pass carries it forward unchanged.
//!
//! ## Incremental compaction
//!
//! Scores every chain:
//!
//! ```text
//! score = hot·w_hot + (pages − 1)·w_pages + tombstone_ratio·w_tomb
//! ```
//!
//! and rewrites only chains with `score ≥ min_score` and
//! `hot ≥ hot_threshold`, at most `max_primary` per ordering.  Equal
//! scores tie-break in ascending primary id.  The hotness counters bias
//! the selection toward frequently-read primaries, where chain shortening
//! pays off first.
//!
//! ## Atomicity
//!
//! Compaction mutates a **working copy** of the manifest; the engine
//! swaps it in (epoch +1) only after every rewrite succeeded.  A failure
//! before the swap leaves the new pages unreferenced — immediately
//! reclaimable garbage, never visible state.

pub mod full;
pub mod incremental;

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::io;

use thiserror::Error;

use crate::hotness::Hotness;
use crate::manifest::{Manifest, ManifestError};
use crate::pages::{build_chain, Codec, PageError, PageFile};
use crate::triple::{Order, Triple};

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Which compaction mode to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionMode {
    /// Rewrite every chain of the selected orderings.
    #[default]
    Full,

    /// Rewrite only chains selected by the scoring function.
    Incremental,
}

/// Scoring weights for incremental candidate selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    /// Weight of the hotness counter.
    pub hot: f64,

    /// Weight of the chain length beyond one page.
    pub pages: f64,

    /// Weight of the chain's tombstoned-triple ratio.
    pub tombstones: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            hot: 1.0,
            pages: 4.0,
            tombstones: 8.0,
        }
    }
}

/// Compaction configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionConfig {
    /// Full or incremental.
    pub mode: CompactionMode,

    /// Orderings to compact.  Defaults to all three.
    pub orders: Vec<Order>,

    /// Minimum number of selected chains for an incremental pass to
    /// proceed; fewer candidates make the pass a no-op.
    pub min_merge: usize,

    /// Minimum hotness for an incremental candidate.
    pub hot_threshold: u32,

    /// Maximum chains rewritten per ordering in one incremental pass.
    pub max_primary: usize,

    /// Chains whose tombstoned ratio reaches this value are candidates
    /// regardless of score.
    pub tombstone_ratio_threshold: f64,

    /// Scoring weights.
    pub weights: ScoreWeights,

    /// Minimum score for an incremental candidate.
    pub min_score: f64,

    /// Run a reader-respecting GC after a successful pass.
    pub auto_gc: bool,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            mode: CompactionMode::Full,
            orders: Order::ALL.to_vec(),
            min_merge: 1,
            hot_threshold: 0,
            max_primary: usize::MAX,
            tombstone_ratio_threshold: 0.3,
            weights: ScoreWeights::default(),
            min_score: 1.0,
            auto_gc: false,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Stats & errors
// ------------------------------------------------------------------------------------------------

/// Result of a compaction pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Chains rewritten across all selected orderings.
    pub primaries_rewritten: usize,

    /// Triples physically removed (duplicates + tombstoned).
    pub triples_removed: usize,

    /// Of those, triples removed because a tombstone masked them.
    pub removed_by_tombstones: usize,

    /// Whether the pass cleared the tombstone set.
    pub tombstones_cleared: bool,
}

/// Unified error type for compaction.
#[derive(Debug, Error)]
pub enum CompactionError {
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
// Shared context
// ------------------------------------------------------------------------------------------------

/// Everything a compaction pass needs, borrowed from the engine.
///
/// `manifest` is the engine's working copy; the caller performs the
/// atomic swap after the pass returns successfully.
pub(crate) struct CompactionCtx<'a> {
    /// Working manifest copy (page tables, orphans, tombstones).
    pub manifest: &'a mut Manifest,

    /// Writer-side page files, indexed by `Order::tag()`.
    pub files: &'a mut [PageFile; 3],

    /// The visible tombstone set.
    pub tombstones: &'a BTreeSet<Triple>,

    /// Hotness counters for incremental selection.
    pub hotness: &'a Hotness,

    /// Page size in bytes.
    pub page_size: usize,

    /// Database-wide codec.
    pub codec: Codec,
}

/// Dispatches to the configured mode.
pub(crate) fn run(
    ctx: &mut CompactionCtx<'_>,
    config: &CompactionConfig,
) -> Result<CompactionStats, CompactionError> {
    match config.mode {
        CompactionMode::Full => full::compact(ctx, config),
        CompactionMode::Incremental => incremental::compact(ctx, config),
    }
}

// ------------------------------------------------------------------------------------------------
// Chain rewrite — shared by both modes
// ------------------------------------------------------------------------------------------------

/// Outcome of rewriting one chain.
pub(crate) struct ChainRewrite {
    /// Triples dropped (duplicates + tombstoned).
    pub removed: usize,

    /// Of those, dropped because of a tombstone.
    pub removed_by_tombstones: usize,
}

/// Rewrites the chain of `(order, primary)` in place on the working
/// manifest: reads the old chain, applies the tombstone set and
/// deduplicates, appends a minimal fresh chain, repoints the page table,
/// and orphanes the old pages.
///
/// A chain whose every triple is masked disappears from the page table
/// entirely.
pub(crate) fn rewrite_chain(
    ctx: &mut CompactionCtx<'_>,
    order: Order,
    primary: u32,
) -> Result<ChainRewrite, CompactionError> {
    let old_offsets = ctx
        .manifest
        .ordering(order)
        .lookups
        .get(&primary)
        .cloned()
        .unwrap_or_default();
    if old_offsets.is_empty() {
        return Ok(ChainRewrite {
            removed: 0,
            removed_by_tombstones: 0,
        });
    }

    let file = &mut ctx.files[order.tag() as usize];
    let triples = file.read_chain(primary, &old_offsets, ctx.page_size)?;
    let before = triples.len();

    // Merge in lexicographic order of the ordering's key tuple,
    // deduplicating and dropping masked triples.
    let mut masked = 0usize;
    let mut survivors: Vec<Triple> = Vec::with_capacity(before);
    let mut seen = BTreeSet::new();
    for t in triples {
        if ctx.tombstones.contains(&t) {
            masked += 1;
            continue;
        }
        if seen.insert(order.sort_key(t)) {
            survivors.push(t);
        }
    }
    survivors.sort_by_key(|&t| order.sort_key(t));

    let state = ctx.manifest.ordering_mut(order);
    if survivors.is_empty() {
        state.lookups.remove(&primary);
    } else {
        let built = build_chain(
            order,
            primary,
            &survivors,
            ctx.page_size,
            ctx.codec,
            file.len(),
        )?;
        file.append(&built.bytes)?;
        state.lookups.insert(primary, built.offsets);
    }
    state.orphans.extend(old_offsets);

    Ok(ChainRewrite {
        removed: before - survivors.len(),
        removed_by_tombstones: masked,
    })
}

/// Ratio of chain triples masked by the tombstone set.
pub(crate) fn tombstone_ratio(tombstones: &BTreeSet<Triple>, chain: &[Triple]) -> f64 {
    if chain.is_empty() {
        return 0.0;
    }
    let masked = chain.iter().filter(|t| tombstones.contains(t)).count();
    masked as f64 / chain.len() as f64
}
