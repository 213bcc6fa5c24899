//! Full compaction — rewrite every chain of the selected orderings.

use tracing::{debug, info};

use crate::triple::Order;

use super::{rewrite_chain, CompactionConfig, CompactionCtx, CompactionError, CompactionStats};

/// Runs a full pass over `config.orders`.
///
/// The tombstone set is cleared only when this single pass covered all
/// three orderings — only then is every page that could have held a
/// masked triple rewritten.
pub(crate) fn compact(
    ctx: &mut CompactionCtx<'_>,
    config: &CompactionConfig,
) -> Result<CompactionStats, CompactionError> {
    let mut stats = CompactionStats::default();

    for &order in &config.orders {
        let primaries: Vec<u32> = ctx
            .manifest
            .ordering(order)
            .lookups
            .keys()
            .copied()
            .collect();

        debug!(
            order = order.name(),
            primaries = primaries.len(),
            "full compaction: rewriting ordering"
        );

        for primary in primaries {
            let rewrite = rewrite_chain(ctx, order, primary)?;
            stats.primaries_rewritten += 1;
            stats.triples_removed += rewrite.removed;
            stats.removed_by_tombstones += rewrite.removed_by_tombstones;
        }
    }

    let covers_all = Order::ALL.iter().all(|o| config.orders.contains(o));
    if covers_all && !ctx.manifest.tombstones.is_empty() {
        debug!(
            cleared = ctx.manifest.tombstones.len(),
            "full compaction covered all orderings, clearing tombstones"
        );
        ctx.manifest.tombstones.clear();
        stats.tombstones_cleared = true;
    }

    info!(
        primaries = stats.primaries_rewritten,
        removed = stats.triples_removed,
        by_tombstones = stats.removed_by_tombstones,
        tombstones_cleared = stats.tombstones_cleared,
        "full compaction finished"
    );
    Ok(stats)
}
