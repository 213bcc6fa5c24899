//! Reader registry: registration, enumeration, stale pruning.

use std::time::Duration;

use tempfile::TempDir;

use crate::readers::{ReaderRegistry, DEFAULT_STALE_AFTER, READERS_DIR};

#[test]
fn register_then_enumerate() {
    let dir = TempDir::new().unwrap();
    let mut registry = ReaderRegistry::open(dir.path(), DEFAULT_STALE_AFTER).unwrap();

    registry.register(5).unwrap();
    assert!(registry.is_registered());

    let readers = registry.active_readers().unwrap();
    assert_eq!(readers.len(), 1);
    assert_eq!(readers[0].epoch, 5);
    assert_eq!(readers[0].pid, std::process::id());
    assert!(readers[0].timestamp_ms > 0);
}

#[test]
fn reregister_replaces_entry() {
    let dir = TempDir::new().unwrap();
    let mut registry = ReaderRegistry::open(dir.path(), DEFAULT_STALE_AFTER).unwrap();

    registry.register(5).unwrap();
    registry.register(6).unwrap();

    let readers = registry.active_readers().unwrap();
    assert_eq!(readers.len(), 1);
    assert_eq!(readers[0].epoch, 6);
}

#[test]
fn deregister_removes_entry() {
    let dir = TempDir::new().unwrap();
    let mut registry = ReaderRegistry::open(dir.path(), DEFAULT_STALE_AFTER).unwrap();

    registry.register(1).unwrap();
    registry.deregister().unwrap();
    assert!(!registry.is_registered());
    assert!(registry.active_readers().unwrap().is_empty());

    // Deregistering again is a no-op.
    registry.deregister().unwrap();
}

#[test]
fn two_registries_see_each_other() {
    let dir = TempDir::new().unwrap();
    let mut a = ReaderRegistry::open(dir.path(), DEFAULT_STALE_AFTER).unwrap();
    let mut b = ReaderRegistry::open(dir.path(), DEFAULT_STALE_AFTER).unwrap();

    a.register(3).unwrap();
    b.register(4).unwrap();

    let mut epochs: Vec<u64> = a
        .active_readers()
        .unwrap()
        .iter()
        .map(|r| r.epoch)
        .collect();
    epochs.sort_unstable();
    assert_eq!(epochs, vec![3, 4]);
}

#[test]
fn stale_entries_are_pruned() {
    let dir = TempDir::new().unwrap();
    let mut registry = ReaderRegistry::open(dir.path(), Duration::from_secs(30)).unwrap();
    registry.register(2).unwrap();

    // Age the file past the threshold (mtime 60 s in the past).
    let readers_dir = dir.path().join(READERS_DIR);
    let entry = std::fs::read_dir(&readers_dir)
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    let old = std::time::SystemTime::now() - Duration::from_secs(60);
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(entry.path())
        .unwrap();
    file.set_times(std::fs::FileTimes::new().set_modified(old))
        .unwrap();

    let readers = registry.active_readers().unwrap();
    assert!(readers.is_empty());
    // Pruning deleted the file, not just skipped it.
    assert_eq!(std::fs::read_dir(&readers_dir).unwrap().count(), 0);
}

#[test]
fn unreadable_entries_are_skipped() {
    let dir = TempDir::new().unwrap();
    let registry = ReaderRegistry::open(dir.path(), DEFAULT_STALE_AFTER).unwrap();

    std::fs::write(dir.path().join(READERS_DIR).join("999-zz.reader"), b"not json").unwrap();
    assert!(registry.active_readers().unwrap().is_empty());
}

#[test]
fn drop_deregisters() {
    let dir = TempDir::new().unwrap();
    {
        let mut registry = ReaderRegistry::open(dir.path(), DEFAULT_STALE_AFTER).unwrap();
        registry.register(1).unwrap();
    }
    let registry = ReaderRegistry::open(dir.path(), DEFAULT_STALE_AFTER).unwrap();
    assert!(registry.active_readers().unwrap().is_empty());
}
