use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

use crate::engine::{Db, DbConfig, Fact, FactPattern};

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Database base path inside a temp dir.
pub fn db_path(dir: &Path) -> PathBuf {
    dir.join("db")
}

/// Standard config: small pages so multi-page chains appear quickly.
pub fn default_config() -> DbConfig {
    init_tracing();
    DbConfig {
        page_size: 256,
        ..DbConfig::default()
    }
}

/// Config without the reader registry (for tests poking GC manually).
pub fn no_reader_config() -> DbConfig {
    init_tracing();
    DbConfig {
        page_size: 256,
        register_reader: false,
        ..DbConfig::default()
    }
}

/// Opens a fresh database in `dir`.
pub fn open_db(dir: &Path) -> Db {
    Db::open(db_path(dir), default_config()).expect("open")
}

/// Reopens the database at `dir` (crash-recovery path when the previous
/// handle was dropped without `close`).
pub fn reopen(dir: &Path) -> Db {
    Db::open(db_path(dir), default_config()).expect("reopen")
}

/// Adds `count` facts with the given subject.
pub fn add_facts(db: &Db, subject: &str, count: usize) {
    for i in 0..count {
        db.add_fact(subject, "knows", &format!("person_{i:04}"))
            .expect("add_fact");
    }
}

/// Queries by subject and returns the matching facts.
pub fn by_subject(db: &Db, subject: &str) -> Vec<Fact> {
    db.query(&FactPattern::with_subject(subject)).expect("query")
}
