//! Pin refcounting: resolve-once, reuse, release on zero.

use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use crate::manifest::Manifest;
use crate::mvcc::{Snapshot, SnapshotTracker};
use crate::pages::Codec;

fn make_snapshot(dir: &TempDir, epoch: u64) -> Snapshot {
    let mut manifest = Manifest::new(Codec::None, 256);
    manifest.epoch = epoch;
    Snapshot::open(dir.path(), manifest).unwrap()
}

#[test]
fn first_pin_resolves_then_reuses() {
    let dir = TempDir::new().unwrap();
    let tracker = SnapshotTracker::new();
    let resolved = AtomicUsize::new(0);

    let (first, initial) = tracker
        .pin_with(|| -> Result<_, std::convert::Infallible> {
            resolved.fetch_add(1, Ordering::SeqCst);
            Ok(make_snapshot(&dir, 7))
        })
        .unwrap();
    assert!(initial);
    assert_eq!(first.epoch(), 7);

    // A second pin must not re-read the manifest.
    let (second, initial) = tracker
        .pin_with(|| -> Result<_, std::convert::Infallible> {
            resolved.fetch_add(1, Ordering::SeqCst);
            Ok(make_snapshot(&dir, 99))
        })
        .unwrap();
    assert!(!initial);
    assert_eq!(second.epoch(), 7);
    assert_eq!(resolved.load(Ordering::SeqCst), 1);
}

#[test]
fn pinned_epoch_tracks_refcount() {
    let dir = TempDir::new().unwrap();
    let tracker = SnapshotTracker::new();
    assert_eq!(tracker.pinned_epoch(), None);

    let _ = tracker
        .pin_with(|| -> Result<_, std::convert::Infallible> { Ok(make_snapshot(&dir, 3)) })
        .unwrap();
    let _ = tracker
        .pin_with(|| -> Result<_, std::convert::Infallible> { Ok(make_snapshot(&dir, 3)) })
        .unwrap();
    assert_eq!(tracker.pinned_epoch(), Some(3));

    // First unpin: still held.
    assert_eq!(tracker.unpin(), None);
    assert_eq!(tracker.pinned_epoch(), Some(3));

    // Last unpin releases and reports the epoch.
    assert_eq!(tracker.unpin(), Some(3));
    assert_eq!(tracker.pinned_epoch(), None);
}

#[test]
fn unpin_without_pin_is_noop() {
    let tracker = SnapshotTracker::new();
    assert_eq!(tracker.unpin(), None);
}

#[test]
fn repin_after_release_resolves_fresh() {
    let dir = TempDir::new().unwrap();
    let tracker = SnapshotTracker::new();

    let _ = tracker
        .pin_with(|| -> Result<_, std::convert::Infallible> { Ok(make_snapshot(&dir, 1)) })
        .unwrap();
    tracker.unpin();

    let (snapshot, initial) = tracker
        .pin_with(|| -> Result<_, std::convert::Infallible> { Ok(make_snapshot(&dir, 2)) })
        .unwrap();
    assert!(initial);
    assert_eq!(snapshot.epoch(), 2);
}

#[test]
fn failed_resolution_leaves_tracker_unpinned() {
    let tracker = SnapshotTracker::new();
    let result: Result<_, &str> = tracker.pin_with(|| Err("io error"));
    assert!(result.is_err());
    assert_eq!(tracker.pinned_epoch(), None);
}
