//! Corruption detection: damaged headers, bodies, and mismatched
//! expectations must surface `Corrupt`, never wrong data.

use crate::pages::{build_chain, decode_page, Codec, PageError, PAGE_HEADER_SIZE};
use crate::triple::{Order, Triple};

const PAGE_SIZE: usize = 256;

fn one_page(order: Order, primary: u32) -> Vec<u8> {
    let mut triples: Vec<Triple> = (0..10u32)
        .map(|i| order.restore(primary, i + 1, i + 2))
        .collect();
    triples.sort_by_key(|&t| order.sort_key(t));
    build_chain(order, primary, &triples, PAGE_SIZE, Codec::None, 0)
        .unwrap()
        .bytes
}

#[test]
fn flipped_body_byte_is_corrupt() {
    let mut page = one_page(Order::Spo, 4);
    page[PAGE_HEADER_SIZE + 1] ^= 0xFF;

    let mut out = Vec::new();
    let err = decode_page(&page, Order::Spo, 4, 0, &mut out).unwrap_err();
    assert!(matches!(
        err,
        PageError::Corrupt {
            reason: "checksum mismatch",
            ..
        }
    ));
}

#[test]
fn flipped_header_byte_is_corrupt() {
    let mut page = one_page(Order::Spo, 4);
    page[5] ^= 0xFF; // inside the primary field

    let mut out = Vec::new();
    assert!(decode_page(&page, Order::Spo, 4, 0, &mut out).is_err());
}

#[test]
fn bad_magic_is_corrupt() {
    let mut page = one_page(Order::Spo, 4);
    page[0] = b'X';

    let mut out = Vec::new();
    let err = decode_page(&page, Order::Spo, 4, 0, &mut out).unwrap_err();
    assert!(matches!(
        err,
        PageError::Corrupt {
            reason: "bad magic",
            ..
        }
    ));
}

#[test]
fn ordering_mismatch_is_corrupt() {
    let page = one_page(Order::Spo, 4);
    let mut out = Vec::new();
    let err = decode_page(&page, Order::Pos, 4, 0, &mut out).unwrap_err();
    assert!(matches!(
        err,
        PageError::Corrupt {
            reason: "ordering mismatch",
            ..
        }
    ));
}

#[test]
fn primary_mismatch_is_corrupt() {
    let page = one_page(Order::Spo, 4);
    let mut out = Vec::new();
    let err = decode_page(&page, Order::Spo, 5, 0, &mut out).unwrap_err();
    assert!(matches!(
        err,
        PageError::Corrupt {
            reason: "primary mismatch",
            ..
        }
    ));
}

#[test]
fn error_carries_ordering_and_offset() {
    let mut page = one_page(Order::Osp, 7);
    page[PAGE_HEADER_SIZE] ^= 0x01;

    let mut out = Vec::new();
    let err = decode_page(&page, Order::Osp, 7, 12_288, &mut out).unwrap_err();
    match err {
        PageError::Corrupt { order, offset, .. } => {
            assert_eq!(order, "OSP");
            assert_eq!(offset, 12_288);
        }
        other => panic!("expected Corrupt, got {other:?}"),
    }
}
