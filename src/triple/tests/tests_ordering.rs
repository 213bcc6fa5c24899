//! Tests for triple permutation and ordering round-trips.

use crate::encoding::{decode_from_slice, encode_to_vec};
use crate::triple::{Order, Triple};

#[test]
fn permute_restore_roundtrip() {
    let t = Triple::new(7, 11, 13);
    for order in Order::ALL {
        let (primary, a, b) = order.permute(t);
        assert_eq!(order.primary(t), primary);
        assert_eq!(order.restore(primary, a, b), t);
    }
}

#[test]
fn permutations_are_the_documented_ones() {
    let t = Triple::new(1, 2, 3);
    assert_eq!(Order::Spo.permute(t), (1, 2, 3));
    assert_eq!(Order::Pos.permute(t), (2, 3, 1));
    assert_eq!(Order::Osp.permute(t), (3, 1, 2));
}

#[test]
fn tags_roundtrip() {
    for order in Order::ALL {
        assert_eq!(Order::from_tag(order.tag()), Some(order));
        assert_eq!(Order::from_name(order.name()), Some(order));
    }
    assert_eq!(Order::from_tag(9), None);
    assert_eq!(Order::from_name("PSO"), None);
}

#[test]
fn file_names() {
    assert_eq!(Order::Spo.file_name(), "pages.SPO");
    assert_eq!(Order::Pos.file_name(), "pages.POS");
    assert_eq!(Order::Osp.file_name(), "pages.OSP");
}

#[test]
fn canonical_order_is_spo_key() {
    let mut triples = vec![
        Triple::new(2, 1, 1),
        Triple::new(1, 2, 1),
        Triple::new(1, 1, 2),
        Triple::new(1, 1, 1),
    ];
    triples.sort();
    assert_eq!(
        triples,
        vec![
            Triple::new(1, 1, 1),
            Triple::new(1, 1, 2),
            Triple::new(1, 2, 1),
            Triple::new(2, 1, 1),
        ]
    );
}

#[test]
fn key_array_roundtrip() {
    let t = Triple::new(5, 6, 7);
    let key: [u32; 3] = t.into();
    assert_eq!(key, [5, 6, 7]);
    assert_eq!(Triple::from(key), t);
}

#[test]
fn encoding_roundtrip() {
    let t = Triple::new(u32::MAX, 0, 12345);
    let bytes = encode_to_vec(&t).unwrap();
    assert_eq!(bytes.len(), 12);
    let (decoded, consumed) = decode_from_slice::<Triple>(&bytes).unwrap();
    assert_eq!(decoded, t);
    assert_eq!(consumed, 12);
}
