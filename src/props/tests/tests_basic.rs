//! Property store: blobs are opaque, persistence is atomic and
//! checksummed.

use tempfile::TempDir;

use crate::props::{PropertyStore, PropsError, PROPS_FILENAME};
use crate::triple::Triple;

#[test]
fn set_and_get_blobs() {
    let mut store = PropertyStore::default();
    assert!(store.is_empty());

    store.set_node(1, b"{\"name\":\"alice\"}".to_vec());
    store.set_edge(Triple::new(1, 2, 3), vec![0xDE, 0xAD]);

    assert_eq!(store.node(1), Some(b"{\"name\":\"alice\"}".as_slice()));
    assert_eq!(store.edge(Triple::new(1, 2, 3)), Some([0xDE, 0xAD].as_slice()));
    assert_eq!(store.node(2), None);
    assert_eq!(store.len(), 2);
}

#[test]
fn set_replaces_previous_blob() {
    let mut store = PropertyStore::default();
    store.set_node(1, b"v1".to_vec());
    store.set_node(1, b"v2".to_vec());
    assert_eq!(store.node(1), Some(b"v2".as_slice()));
    assert_eq!(store.len(), 1);
}

#[test]
fn store_load_roundtrip() {
    let dir = TempDir::new().unwrap();

    let mut store = PropertyStore::default();
    store.set_node(1, b"alice".to_vec());
    store.set_node(2, Vec::new()); // empty blob is a valid value
    store.set_edge(Triple::new(1, 2, 3), b"since=2019".to_vec());
    store.store(dir.path()).unwrap();

    let loaded = PropertyStore::load(dir.path()).unwrap();
    assert_eq!(loaded, store);
    assert_eq!(loaded.node(2), Some([].as_slice()));
}

#[test]
fn missing_file_loads_empty() {
    let dir = TempDir::new().unwrap();
    let store = PropertyStore::load(dir.path()).unwrap();
    assert!(store.is_empty());
}

#[test]
fn flipped_byte_is_corrupt() {
    let dir = TempDir::new().unwrap();

    let mut store = PropertyStore::default();
    store.set_node(1, b"alice".to_vec());
    store.store(dir.path()).unwrap();

    let path = dir.path().join(PROPS_FILENAME);
    let mut raw = std::fs::read(&path).unwrap();
    raw[10] ^= 0xFF;
    std::fs::write(&path, &raw).unwrap();

    assert!(matches!(
        PropertyStore::load(dir.path()),
        Err(PropsError::Corrupt(_))
    ));
}

#[test]
fn truncated_file_is_corrupt() {
    let dir = TempDir::new().unwrap();

    let mut store = PropertyStore::default();
    store.set_node(1, b"alice".to_vec());
    store.store(dir.path()).unwrap();

    let path = dir.path().join(PROPS_FILENAME);
    let raw = std::fs::read(&path).unwrap();
    std::fs::write(&path, &raw[..raw.len() - 6]).unwrap();

    assert!(PropertyStore::load(dir.path()).is_err());
}

#[test]
fn second_store_replaces_first() {
    let dir = TempDir::new().unwrap();

    let mut store = PropertyStore::default();
    store.set_node(1, b"v1".to_vec());
    store.store(dir.path()).unwrap();

    store.set_node(1, b"v2".to_vec());
    store.store(dir.path()).unwrap();

    let loaded = PropertyStore::load(dir.path()).unwrap();
    assert_eq!(loaded.node(1), Some(b"v2".as_slice()));
}
