//! Hotness counters — per-(ordering, primary) access tracking.
//!
//! Every visible read of a `(ordering, primary)` chain during a query
//! bumps its counter.  Incremental compaction uses the counters to bias
//! chain selection toward frequently-touched primaries.
//!
//! Counters live in memory and are persisted to `hotness.json` on flush
//! (atomic temp-file rename).  On open the file is loaded if present,
//! otherwise counting starts empty.  Losing the file costs nothing but
//! compaction heuristics — it is never consulted for correctness.

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::readers::now_ms;
use crate::triple::Order;

/// Hotness file name inside the pages directory.
pub const HOTNESS_FILENAME: &str = "hotness.json";

/// Current hotness document version.
const HOTNESS_VERSION: u32 = 1;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned when persisting hotness counters.
#[derive(Debug, Error)]
pub enum HotnessError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialisation failure.
    #[error("Hotness JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// Document
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HotnessDoc {
    version: u32,
    updated_at: u64,
    counts: BTreeMap<String, BTreeMap<u32, u32>>,
}

// ------------------------------------------------------------------------------------------------
// Tracker
// ------------------------------------------------------------------------------------------------

/// In-memory hotness counters with JSON persistence.
#[derive(Debug, Default)]
pub struct Hotness {
    counts: BTreeMap<Order, BTreeMap<u32, u32>>,
}

impl Hotness {
    /// Loads counters from `dir`, or starts empty when the file is absent
    /// or unreadable (the counters are advisory).
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(HOTNESS_FILENAME);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };

        let doc: HotnessDoc = match serde_json::from_slice(&raw) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "hotness file unreadable, starting empty");
                return Self::default();
            }
        };

        let mut counts = BTreeMap::new();
        for (name, primaries) in doc.counts {
            if let Some(order) = Order::from_name(&name) {
                counts.insert(order, primaries);
            }
        }

        debug!(orders = counts.len(), "hotness loaded");
        Self { counts }
    }

    /// Records one visible read of `(order, primary)`.
    pub fn record(&mut self, order: Order, primary: u32) {
        let counter = self.counts.entry(order).or_default().entry(primary).or_insert(0);
        *counter = counter.saturating_add(1);
    }

    /// Current count for `(order, primary)`.
    pub fn count(&self, order: Order, primary: u32) -> u32 {
        self.counts
            .get(&order)
            .and_then(|m| m.get(&primary))
            .copied()
            .unwrap_or(0)
    }

    /// All counters for one ordering.
    pub fn counts_for(&self, order: Order) -> Option<&BTreeMap<u32, u32>> {
        self.counts.get(&order)
    }

    /// Persists the counters atomically (tmp + rename).
    pub fn store(&self, dir: &Path) -> Result<(), HotnessError> {
        let doc = HotnessDoc {
            version: HOTNESS_VERSION,
            updated_at: now_ms(),
            counts: self
                .counts
                .iter()
                .map(|(order, primaries)| (order.name().to_string(), primaries.clone()))
                .collect(),
        };
        let bytes = serde_json::to_vec(&doc)?;

        let path = dir.join(HOTNESS_FILENAME);
        let tmp = dir.join(format!("{HOTNESS_FILENAME}.tmp"));
        {
            let mut f = File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
