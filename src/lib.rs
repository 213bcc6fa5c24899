//! # TriaDB
//!
//! An embeddable, persistent **property-graph database** storing facts as
//! subject–predicate–object triples in paged indexes, with crash-safe
//! transactional writes and snapshot reads.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                          Db                               │
//! │  ┌───────────┐   ┌──────────────────────┐  ┌───────────┐  │
//! │  │  Staging  │   │   Paged indexes      │  │ Property  │  │
//! │  │  + WAL    │   │  SPO / POS / OSP     │  │  store    │  │
//! │  └─────┬─────┘   └──────────▲───────────┘  └───────────┘  │
//! │        │       flush        │                             │
//! │        └────────────────────┘                             │
//! │  ┌─────────────────────────────────────────────────────┐  │
//! │  │  Manifest (page tables · tombstones · epoch)        │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! │  ┌──────────────┐  ┌────────────┐  ┌──────────────────┐   │
//! │  │  Compaction  │  │    GC      │  │ Reader registry  │   │
//! │  └──────────────┘  └────────────┘  └──────────────────┘   │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core handle — open, facts, transactions, flush, query, compact, gc |
//! | [`triple`] | Triple model, the three orderings, query patterns |
//! | [`dictionary`] | String↔id interning with an append-only log file |
//! | [`wal`] | CRC-protected write-ahead log with transactional replay |
//! | [`pages`] | Fixed-size page files, delta-encoded bodies, chain builder |
//! | [`staging`] | In-memory buffer of pending operations |
//! | [`manifest`] | Atomically-swapped JSON metadata document |
//! | [`mvcc`] | Epoch pinning and snapshot resolution |
//! | [`readers`] | Cross-process reader registry for GC safety |
//! | [`compaction`] | Full and hotness-biased incremental chain rewriting |
//! | [`gc`] | Orphan-page reclamation with a journalled file swap |
//! | [`hotness`] | Per-(ordering, primary) access counters |
//! | [`props`] | Opaque node/edge property blobs |
//! | [`encoding`] | Crate-owned deterministic binary wire format |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is WAL-framed before it is
//!   acknowledged; BEGIN…COMMIT groups replay atomically.
//! - **Three index orderings** — SPO, POS, OSP page files answer any
//!   partially-bound triple pattern from the grouping primary.
//! - **MVCC epochs** — readers pin an epoch and observe a frozen
//!   manifest and page image while the single writer advances.
//! - **Tombstone deletes + compaction** — logical deletion, full and
//!   incremental chain rewriting, orphan-page GC gated on a
//!   cross-process reader registry.
//! - **Block-level CRC32 integrity** — WAL records, pages, dictionary
//!   entries, the property store, and the manifest are all checksummed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use triadb::engine::{Db, DbConfig, FactPattern};
//!
//! let db = Db::open("/tmp/social", DbConfig::default()).unwrap();
//!
//! db.add_fact("alice", "knows", "bob").unwrap();
//! db.add_fact("bob", "knows", "carol").unwrap();
//! db.flush().unwrap();
//!
//! let friends = db
//!     .query(&FactPattern {
//!         subject: Some("alice".into()),
//!         predicate: Some("knows".into()),
//!         ..FactPattern::default()
//!     })
//!     .unwrap();
//! assert_eq!(friends[0].object, "bob");
//!
//! db.close().unwrap();
//! ```

pub mod compaction;
pub mod dictionary;
pub mod encoding;
pub mod engine;
pub mod gc;
pub mod hotness;
pub mod lockfile;
pub mod manifest;
pub mod mvcc;
pub mod pages;
pub mod props;
pub mod readers;
pub mod staging;
pub mod triple;
pub mod wal;

pub use compaction::{CompactionConfig, CompactionMode, CompactionStats};
pub use engine::query::Fact;
pub use engine::{Db, DbConfig, DbError, DbStats, FactPattern};
pub use gc::GcOutcome;
pub use pages::Codec;
pub use triple::{Order, Triple, TriplePattern};
