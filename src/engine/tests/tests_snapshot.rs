//! Snapshot pinning: repeatability, isolation from the writer, and the
//! streaming cursor.

use tempfile::TempDir;

use crate::engine::FactPattern;

use super::helpers::*;

#[test]
fn pinned_snapshot_ignores_later_flushes() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());

    add_facts(&db, "alice", 5);
    db.flush().unwrap();

    let snapshot = db.snapshot().unwrap();
    assert_eq!(snapshot.epoch(), 1);

    // The writer moves on: new facts, a delete, another flush.
    // (Staging is writer-local and outside the snapshot guarantee, so
    // the overlap window only flushes writer-invisible page state.)
    let before = snapshot.query(&FactPattern::with_subject("alice")).unwrap();
    db.add_fact("bob", "knows", "carol").unwrap();
    db.flush().unwrap();
    assert_eq!(db.epoch().unwrap(), 2);

    // The pinned view answers identically, flush after flush.
    let after = snapshot.query(&FactPattern::with_subject("alice")).unwrap();
    assert_eq!(before, after);
    assert_eq!(snapshot.epoch(), 1);

    // Queries during the pin reuse the pinned epoch, so bob is not yet
    // visible through the snapshot.
    assert!(snapshot
        .query(&FactPattern::with_subject("bob"))
        .unwrap()
        .is_empty());

    drop(snapshot);

    // A fresh query resolves the new manifest.
    assert_eq!(by_subject(&db, "bob").len(), 1);
}

#[test]
fn repeated_queries_at_pinned_epoch_return_identical_sets() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());

    add_facts(&db, "s", 30);
    db.flush().unwrap();

    let snapshot = db.snapshot().unwrap();
    let first = snapshot.query(&FactPattern::with_subject("s")).unwrap();
    for _ in 0..5 {
        assert_eq!(snapshot.query(&FactPattern::with_subject("s")).unwrap(), first);
    }
}

#[test]
fn nested_pins_share_one_epoch() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());

    add_facts(&db, "s", 3);
    db.flush().unwrap();

    let outer = db.snapshot().unwrap();
    let inner = db.snapshot().unwrap();
    assert_eq!(outer.epoch(), inner.epoch());

    drop(inner);
    // The outer pin still holds.
    assert_eq!(outer.query(&FactPattern::with_subject("s")).unwrap().len(), 3);
}

#[test]
fn stream_query_yields_everything_lazily() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());

    add_facts(&db, "alice", 40);
    db.flush().unwrap();
    db.add_fact("alice", "knows", "staged_only").unwrap();

    let stream = db.stream_query(&FactPattern::with_subject("alice")).unwrap();
    let facts: Result<Vec<_>, _> = stream.collect();
    let facts = facts.unwrap();
    assert_eq!(facts.len(), 41);
    assert!(facts.iter().any(|f| f.object == "staged_only"));
}

#[test]
fn stream_query_rewind_restarts() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());

    add_facts(&db, "s", 10);
    db.flush().unwrap();

    let mut stream = db.stream_query(&FactPattern::with_subject("s")).unwrap();
    let first_run: Vec<_> = stream.by_ref().map(Result::unwrap).collect();
    assert_eq!(first_run.len(), 10);

    stream.rewind();
    let second_run: Vec<_> = stream.map(Result::unwrap).collect();
    assert_eq!(first_run, second_run);
}

#[test]
fn dropping_stream_releases_the_pin() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());

    add_facts(&db, "s", 5);
    db.flush().unwrap();

    let mut stream = db.stream_query(&FactPattern::with_subject("s")).unwrap();
    // Cancel after one result.
    let _ = stream.next();
    drop(stream);

    // A new query resolves a fresh snapshot at the current epoch.
    db.add_fact("s", "knows", "late").unwrap();
    db.flush().unwrap();
    assert_eq!(by_subject(&db, "s").len(), 6);
}

#[test]
fn stream_query_with_unknown_subject_is_empty() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());
    add_facts(&db, "s", 3);

    let stream = db.stream_query(&FactPattern::with_subject("nobody")).unwrap();
    assert_eq!(stream.count(), 0);
}

#[test]
fn stream_results_match_query_results() {
    let dir = TempDir::new().unwrap();
    let db = open_db(dir.path());

    add_facts(&db, "alice", 20);
    db.flush().unwrap();
    add_facts(&db, "alice", 25); // 5 staged beyond the flushed 20

    let mut streamed: Vec<_> = db
        .stream_query(&FactPattern::with_subject("alice"))
        .unwrap()
        .map(Result::unwrap)
        .collect();
    streamed.sort();

    let mut queried = by_subject(&db, "alice");
    queried.sort();
    assert_eq!(streamed, queried);
}
