//! Incremental compaction — score-driven chain selection.
//!
//! Chains are scored on hotness, length, and tombstone load; only the
//! chains worth rewriting are touched.  This keeps steady-state write
//! amplification bounded while still shrinking the chains readers
//! actually hit.

use std::cmp::Ordering as CmpOrdering;

use tracing::{debug, info, trace};

use super::{
    rewrite_chain, tombstone_ratio, CompactionConfig, CompactionCtx, CompactionError,
    CompactionStats,
};
use crate::triple::Order;

/// One scored candidate chain.
#[derive(Debug)]
struct Candidate {
    order: Order,
    primary: u32,
    score: f64,
}

/// Runs an incremental pass over `config.orders`.
///
/// Candidates must clear both `hot_threshold` and `min_score` (a chain at
/// or above the tombstone-ratio threshold qualifies regardless of score).
/// At most `max_primary` chains per ordering are rewritten, highest score
/// first; equal scores process in ascending primary id.  Fewer than
/// `min_merge` selected chains make the whole pass a no-op.
pub(crate) fn compact(
    ctx: &mut CompactionCtx<'_>,
    config: &CompactionConfig,
) -> Result<CompactionStats, CompactionError> {
    let mut selected: Vec<Candidate> = Vec::new();

    for &order in &config.orders {
        let mut candidates: Vec<Candidate> = Vec::new();

        let chains: Vec<(u32, Vec<u64>)> = ctx
            .manifest
            .ordering(order)
            .lookups
            .iter()
            .map(|(&p, offsets)| (p, offsets.clone()))
            .collect();

        for (primary, offsets) in chains {
            let hot = ctx.hotness.count(order, primary);
            if hot < config.hot_threshold {
                continue;
            }

            let file = &ctx.files[order.tag() as usize];
            let chain = file.read_chain(primary, &offsets, ctx.page_size)?;
            let ratio = tombstone_ratio(ctx.tombstones, &chain);

            let score = f64::from(hot) * config.weights.hot
                + (offsets.len() as f64 - 1.0) * config.weights.pages
                + ratio * config.weights.tombstones;

            let qualifies = score >= config.min_score || ratio >= config.tombstone_ratio_threshold;
            trace!(
                order = order.name(),
                primary,
                hot,
                pages = offsets.len(),
                ratio,
                score,
                qualifies,
                "incremental candidate scored"
            );
            if qualifies {
                candidates.push(Candidate {
                    order,
                    primary,
                    score,
                });
            }
        }

        // Highest score first; ties in ascending primary id.
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(CmpOrdering::Equal)
                .then_with(|| a.primary.cmp(&b.primary))
        });
        candidates.truncate(config.max_primary);
        selected.extend(candidates);
    }

    if selected.len() < config.min_merge {
        debug!(
            selected = selected.len(),
            min_merge = config.min_merge,
            "incremental compaction below min_merge, skipping"
        );
        return Ok(CompactionStats::default());
    }

    let mut stats = CompactionStats::default();
    for candidate in &selected {
        let rewrite = rewrite_chain(ctx, candidate.order, candidate.primary)?;
        stats.primaries_rewritten += 1;
        stats.triples_removed += rewrite.removed;
        stats.removed_by_tombstones += rewrite.removed_by_tombstones;
    }

    info!(
        primaries = stats.primaries_rewritten,
        removed = stats.triples_removed,
        by_tombstones = stats.removed_by_tombstones,
        "incremental compaction finished"
    );
    Ok(stats)
}
