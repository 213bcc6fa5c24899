//! Shared fixture for compaction tests: a pages directory with chains
//! written through the real builder, plus a matching manifest.

use std::collections::BTreeSet;

use tempfile::TempDir;

use crate::compaction::{CompactionConfig, CompactionCtx, CompactionStats, run};
use crate::hotness::Hotness;
use crate::manifest::Manifest;
use crate::pages::{build_chain, Codec, PageFile};
use crate::triple::{Order, Triple};

pub const PAGE_SIZE: usize = 256;

pub struct Fixture {
    pub dir: TempDir,
    pub manifest: Manifest,
    pub files: [PageFile; 3],
    pub tombstones: BTreeSet<Triple>,
    pub hotness: Hotness,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let files = [
            PageFile::open(dir.path(), Order::Spo).unwrap(),
            PageFile::open(dir.path(), Order::Pos).unwrap(),
            PageFile::open(dir.path(), Order::Osp).unwrap(),
        ];
        Self {
            dir,
            manifest: Manifest::new(Codec::None, PAGE_SIZE as u32),
            files,
            tombstones: BTreeSet::new(),
            hotness: Hotness::default(),
        }
    }

    /// Writes `triples` as chains in all three orderings, as a flush
    /// would.
    pub fn write_all_orders(&mut self, triples: &[Triple]) {
        for order in Order::ALL {
            let mut by_primary: std::collections::BTreeMap<u32, Vec<Triple>> = Default::default();
            for &t in triples {
                by_primary.entry(order.primary(t)).or_default().push(t);
            }
            for (primary, mut group) in by_primary {
                group.sort_by_key(|&t| order.sort_key(t));
                group.dedup();
                let file = &mut self.files[order.tag() as usize];
                let built =
                    build_chain(order, primary, &group, PAGE_SIZE, Codec::None, file.len())
                        .unwrap();
                file.append(&built.bytes).unwrap();
                let state = self.manifest.ordering_mut(order);
                if let Some(old) = state.lookups.insert(primary, built.offsets) {
                    state.orphans.extend(old);
                }
            }
            self.files[order.tag() as usize].sync().unwrap();
        }
    }

    /// Marks `t` as logically deleted in both views of the tombstone set.
    pub fn tombstone(&mut self, t: Triple) {
        self.tombstones.insert(t);
        self.manifest.tombstones.push(t.into());
    }

    pub fn compact(&mut self, config: &CompactionConfig) -> CompactionStats {
        let mut ctx = CompactionCtx {
            manifest: &mut self.manifest,
            files: &mut self.files,
            tombstones: &self.tombstones,
            hotness: &self.hotness,
            page_size: PAGE_SIZE,
            codec: Codec::None,
        };
        run(&mut ctx, config).unwrap()
    }

    /// All triples visible through the current page tables, across one
    /// ordering, with tombstones applied.
    pub fn visible(&self, order: Order) -> Vec<Triple> {
        let mut out = Vec::new();
        let state = self.manifest.ordering(order);
        let file = &self.files[order.tag() as usize];
        for (&primary, offsets) in &state.lookups {
            for t in file.read_chain(primary, offsets, PAGE_SIZE).unwrap() {
                if !self.tombstones.contains(&t) {
                    out.push(t);
                }
            }
        }
        out.sort();
        out
    }
}

/// `count` facts spread across a handful of subjects.
pub fn dataset(count: u32) -> Vec<Triple> {
    (0..count)
        .map(|i| Triple::new(i % 5 + 1, 100 + i % 3, 1000 + i))
        .collect()
}
