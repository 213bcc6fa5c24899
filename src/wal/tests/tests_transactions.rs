//! Transactional framing: atomic BEGIN…COMMIT groups, aborts, partial
//! transactions at the tail.

use tempfile::TempDir;

use crate::triple::Triple;
use crate::wal::{self, Wal, WalEvent};

#[test]
fn committed_transaction_applies_atomically() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.wal");

    let end = {
        let mut wal = Wal::open(&path).unwrap();
        wal.append_begin(Some("tx-1".into()), Some("session-a".into()))
            .unwrap();
        wal.append_add_triple(Triple::new(1, 2, 3)).unwrap();
        wal.append_add_triple(Triple::new(4, 5, 6)).unwrap();
        wal.append_commit_durable().unwrap();
        wal.offset()
    };

    let replay = wal::replay(&path, None).unwrap();
    assert_eq!(replay.safe_offset, end);
    assert_eq!(replay.events.len(), 2);
    assert_eq!(replay.committed_txs.len(), 1);
    assert_eq!(replay.committed_txs[0].id.as_deref(), Some("tx-1"));
    assert_eq!(
        replay.committed_txs[0].session_id.as_deref(),
        Some("session-a")
    );
}

#[test]
fn uncommitted_tail_transaction_is_discarded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.wal");

    let safe = {
        let mut wal = Wal::open(&path).unwrap();
        wal.append_add_triple(Triple::new(1, 1, 1)).unwrap();
        let safe = wal.offset();
        wal.append_begin(None, None).unwrap();
        wal.append_add_triple(Triple::new(2, 2, 2)).unwrap();
        // No COMMIT — crash.
        wal.sync().unwrap();
        safe
    };

    let replay = wal::replay(&path, None).unwrap();
    assert_eq!(replay.safe_offset, safe);
    assert_eq!(replay.events, vec![WalEvent::AddTriple(Triple::new(1, 1, 1))]);
    assert!(replay.committed_txs.is_empty());
}

#[test]
fn aborted_transaction_is_discarded_but_resolved() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.wal");

    let end = {
        let mut wal = Wal::open(&path).unwrap();
        wal.append_begin(None, None).unwrap();
        wal.append_add_triple(Triple::new(2, 2, 2)).unwrap();
        wal.append_abort().unwrap();
        wal.append_add_triple(Triple::new(3, 3, 3)).unwrap();
        wal.sync().unwrap();
        wal.offset()
    };

    let replay = wal::replay(&path, None).unwrap();
    assert_eq!(replay.events, vec![WalEvent::AddTriple(Triple::new(3, 3, 3))]);
    assert_eq!(replay.safe_offset, end);
}

#[test]
fn records_after_commit_are_standalone() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.wal");

    {
        let mut wal = Wal::open(&path).unwrap();
        wal.append_begin(None, None).unwrap();
        wal.append_add_triple(Triple::new(1, 1, 1)).unwrap();
        wal.append_commit().unwrap();
        wal.append_delete_triple(Triple::new(1, 1, 1)).unwrap();
        wal.sync().unwrap();
    }

    let replay = wal::replay(&path, None).unwrap();
    assert_eq!(
        replay.events,
        vec![
            WalEvent::AddTriple(Triple::new(1, 1, 1)),
            WalEvent::DeleteTriple(Triple::new(1, 1, 1)),
        ]
    );
}

#[test]
fn nested_begin_discards_earlier_transaction() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.wal");

    {
        let mut wal = Wal::open(&path).unwrap();
        wal.append_begin(None, None).unwrap();
        wal.append_add_triple(Triple::new(1, 1, 1)).unwrap();
        // Second BEGIN without COMMIT: the first group can never commit.
        wal.append_begin(None, None).unwrap();
        wal.append_add_triple(Triple::new(2, 2, 2)).unwrap();
        wal.append_commit().unwrap();
        wal.sync().unwrap();
    }

    let replay = wal::replay(&path, None).unwrap();
    assert_eq!(replay.events, vec![WalEvent::AddTriple(Triple::new(2, 2, 2))]);
    assert_eq!(replay.warnings, 1);
}

#[test]
fn many_transactions_replay_in_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.wal");

    {
        let mut wal = Wal::open(&path).unwrap();
        for i in 0..10u32 {
            wal.append_begin(Some(format!("tx-{i}")), None).unwrap();
            wal.append_add_triple(Triple::new(i, 100, 200)).unwrap();
            wal.append_commit().unwrap();
        }
        wal.sync().unwrap();
    }

    let replay = wal::replay(&path, None).unwrap();
    assert_eq!(replay.committed_txs.len(), 10);
    assert_eq!(replay.events.len(), 10);
    for (i, event) in replay.events.iter().enumerate() {
        assert_eq!(*event, WalEvent::AddTriple(Triple::new(i as u32, 100, 200)));
    }
}
