//! Basic dictionary behaviour: interning, lookup, resolve, persistence.

use tempfile::TempDir;

use crate::dictionary::{Dictionary, DictionaryError};

#[test]
fn intern_allocates_sequential_ids() {
    let dir = TempDir::new().unwrap();
    let mut dict = Dictionary::open(dir.path().join("db.dictionary")).unwrap();

    let alice = dict.intern("alice").unwrap();
    let knows = dict.intern("knows").unwrap();
    let bob = dict.intern("bob").unwrap();

    assert_eq!(alice, 1);
    assert_eq!(knows, 2);
    assert_eq!(bob, 3);
    assert_eq!(dict.len(), 3);
}

#[test]
fn intern_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let mut dict = Dictionary::open(dir.path().join("db.dictionary")).unwrap();

    let first = dict.intern("alice").unwrap();
    let second = dict.intern("alice").unwrap();
    assert_eq!(first, second);
    assert_eq!(dict.len(), 1);
}

#[test]
fn roundtrip_resolve() {
    let dir = TempDir::new().unwrap();
    let mut dict = Dictionary::open(dir.path().join("db.dictionary")).unwrap();

    for name in ["alice", "knows", "bob", ""] {
        let id = dict.intern(name).unwrap();
        assert_eq!(dict.resolve(id).unwrap(), name);
    }
}

#[test]
fn lookup_without_allocation() {
    let dir = TempDir::new().unwrap();
    let mut dict = Dictionary::open(dir.path().join("db.dictionary")).unwrap();

    assert_eq!(dict.lookup("alice"), None);
    let id = dict.intern("alice").unwrap();
    assert_eq!(dict.lookup("alice"), Some(id));
    assert_eq!(dict.len(), 1);
}

#[test]
fn unknown_id_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let dict = Dictionary::open(dir.path().join("db.dictionary")).unwrap();
    assert!(matches!(
        dict.resolve(42),
        Err(DictionaryError::Corrupt(42))
    ));
}

#[test]
fn entries_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.dictionary");

    let (alice, bob) = {
        let mut dict = Dictionary::open(&path).unwrap();
        let alice = dict.intern("alice").unwrap();
        let bob = dict.intern("bob").unwrap();
        dict.sync().unwrap();
        (alice, bob)
    };

    let mut dict = Dictionary::open(&path).unwrap();
    assert_eq!(dict.resolve(alice).unwrap(), "alice");
    assert_eq!(dict.resolve(bob).unwrap(), "bob");

    // Ids continue past the recovered maximum; none are reused.
    let carol = dict.intern("carol").unwrap();
    assert!(carol > bob);
}
