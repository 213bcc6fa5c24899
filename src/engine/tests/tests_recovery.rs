//! Crash recovery: drop without close, WAL replay, torn transactions.

use tempfile::TempDir;

use crate::engine::FactPattern;

use super::helpers::*;

#[test]
fn unflushed_facts_survive_crash_via_wal() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_db(dir.path());
        db.add_fact("k1", "is", "v1").unwrap();
        db.add_fact("k2", "is", "v2").unwrap();
        db.add_fact("k3", "is", "v3").unwrap();
        // Drop without close — simulates a crash.
    }

    let db = reopen(dir.path());
    for (s, o) in [("k1", "v1"), ("k2", "v2"), ("k3", "v3")] {
        let facts = by_subject(&db, s);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].object, o);
    }
}

#[test]
fn unflushed_deletes_survive_crash() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_db(dir.path());
        add_facts(&db, "s", 10);
        db.flush().unwrap();
        db.delete_fact("s", "knows", "person_0000").unwrap();
        // Crash before the delete was flushed.
    }

    let db = reopen(dir.path());
    assert_eq!(by_subject(&db, "s").len(), 9);
}

#[test]
fn durable_transactions_survive_without_flush() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_db(dir.path());
        db.begin_tx(Some("tx-1".into()), None).unwrap();
        db.add_fact("alice", "knows", "bob").unwrap();
        db.add_fact("bob", "knows", "carol").unwrap();
        db.commit_tx_durable().unwrap();
        // Crash.
    }

    let db = reopen(dir.path());
    assert_eq!(by_subject(&db, "alice").len(), 1);
    assert_eq!(by_subject(&db, "bob").len(), 1);
}

#[test]
fn exactly_committed_transactions_are_visible() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_db(dir.path());
        // Ten committed transactions…
        for i in 0..10 {
            db.begin_tx(Some(format!("tx-{i}")), None).unwrap();
            db.add_fact(&format!("s{i}"), "n", "o").unwrap();
            db.commit_tx_durable().unwrap();
        }
        // …and an eleventh that never commits.
        db.begin_tx(Some("tx-10".into()), None).unwrap();
        db.add_fact("s10", "n", "o").unwrap();
        // Crash mid-transaction.
    }

    let db = reopen(dir.path());
    for i in 0..10 {
        assert_eq!(by_subject(&db, &format!("s{i}")).len(), 1, "tx-{i}");
    }
    assert!(by_subject(&db, "s10").is_empty());

    // The dictionary is consistent: every id in surviving facts resolves
    // (a failure would have surfaced as DictionaryCorrupt above).
    assert_eq!(db.query(&FactPattern::any()).unwrap().len(), 10);
}

#[test]
fn aborted_transaction_stays_invisible_after_crash() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_db(dir.path());
        db.begin_tx(None, None).unwrap();
        db.add_fact("ghost", "is", "gone").unwrap();
        db.abort_tx().unwrap();
        db.add_fact("real", "is", "here").unwrap();
    }

    let db = reopen(dir.path());
    assert!(by_subject(&db, "ghost").is_empty());
    assert_eq!(by_subject(&db, "real").len(), 1);
}

#[test]
fn recovery_on_top_of_flushed_state_merges_both() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_db(dir.path());
        add_facts(&db, "old", 5);
        db.flush().unwrap();
        add_facts(&db, "new", 3);
        // Crash with mixed durable layers.
    }

    let db = reopen(dir.path());
    assert_eq!(by_subject(&db, "old").len(), 5);
    assert_eq!(by_subject(&db, "new").len(), 3);

    // A flush after recovery persists the WAL-recovered tail.
    db.flush().unwrap();
    db.close().unwrap();

    let db = reopen(dir.path());
    assert_eq!(by_subject(&db, "new").len(), 3);
}

#[test]
fn torn_wal_tail_is_truncated_on_open() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_db(dir.path());
        db.add_fact("a", "b", "c").unwrap();
        db.close().unwrap();
    }

    // Append garbage to the WAL, as a torn write would leave.
    let wal_path = db_path(dir.path()).with_extension("wal");
    let mut raw = std::fs::read(&wal_path).unwrap();
    raw.extend_from_slice(&[0xAB; 7]);
    std::fs::write(&wal_path, &raw).unwrap();

    let db = reopen(dir.path());
    assert_eq!(by_subject(&db, "a").len(), 1);

    // New writes append cleanly past the repaired tail.
    db.add_fact("d", "e", "f").unwrap();
    drop(db);

    let db = reopen(dir.path());
    assert_eq!(by_subject(&db, "a").len(), 1);
    assert_eq!(by_subject(&db, "d").len(), 1);
}

#[test]
fn double_crash_between_flushes_is_stable() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_db(dir.path());
        add_facts(&db, "s", 8);
    }
    {
        // First recovery replays the WAL but crashes again before flush.
        let db = reopen(dir.path());
        assert_eq!(by_subject(&db, "s").len(), 8);
    }

    let db = reopen(dir.path());
    assert_eq!(by_subject(&db, "s").len(), 8);
    db.flush().unwrap();
    assert_eq!(by_subject(&db, "s").len(), 8);
}
