//! PageFile behaviour: append, chain reads, and image reads.

use tempfile::TempDir;

use crate::pages::{build_chain, read_chain_from, Codec, PageFile};
use crate::triple::{Order, Triple};

const PAGE_SIZE: usize = 256;

fn sorted_triples(order: Order, primary: u32, count: u32) -> Vec<Triple> {
    let mut triples: Vec<Triple> = (0..count)
        .map(|i| order.restore(primary, i + 1, (i % 5) + 1))
        .collect();
    triples.sort_by_key(|&t| order.sort_key(t));
    triples
}

#[test]
fn append_then_read_chain() {
    let dir = TempDir::new().unwrap();
    let mut file = PageFile::open(dir.path(), Order::Spo).unwrap();
    assert!(file.is_empty());

    let triples = sorted_triples(Order::Spo, 3, 20);
    let built = build_chain(Order::Spo, 3, &triples, PAGE_SIZE, Codec::None, file.len()).unwrap();
    file.append(&built.bytes).unwrap();
    file.sync().unwrap();

    let read = file.read_chain(3, &built.offsets, PAGE_SIZE).unwrap();
    assert_eq!(read, triples);
}

#[test]
fn chains_for_many_primaries_interleave() {
    let dir = TempDir::new().unwrap();
    let mut file = PageFile::open(dir.path(), Order::Pos).unwrap();

    let mut chains = Vec::new();
    for primary in [10u32, 20, 30] {
        let triples = sorted_triples(Order::Pos, primary, 15);
        let built =
            build_chain(Order::Pos, primary, &triples, PAGE_SIZE, Codec::None, file.len()).unwrap();
        file.append(&built.bytes).unwrap();
        chains.push((primary, built.offsets, triples));
    }

    for (primary, offsets, expected) in chains {
        let read = file.read_chain(primary, &offsets, PAGE_SIZE).unwrap();
        assert_eq!(read, expected, "primary {primary}");
    }
}

#[test]
fn read_past_end_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let file = PageFile::open(dir.path(), Order::Spo).unwrap();
    let err = file.read_chain(1, &[0], PAGE_SIZE).unwrap_err();
    assert!(matches!(err, crate::pages::PageError::Corrupt { .. }));
}

#[test]
fn image_reads_match_file_reads() {
    let dir = TempDir::new().unwrap();
    let mut file = PageFile::open(dir.path(), Order::Osp).unwrap();

    let triples = sorted_triples(Order::Osp, 8, 30);
    let built = build_chain(Order::Osp, 8, &triples, PAGE_SIZE, Codec::None, file.len()).unwrap();
    file.append(&built.bytes).unwrap();
    file.sync().unwrap();

    let image = std::fs::read(file.path()).unwrap();
    let via_image = read_chain_from(&image, Order::Osp, 8, &built.offsets, PAGE_SIZE).unwrap();
    let via_file = file.read_chain(8, &built.offsets, PAGE_SIZE).unwrap();
    assert_eq!(via_image, via_file);
    assert_eq!(via_image, triples);
}

#[test]
fn len_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let len = {
        let mut file = PageFile::open(dir.path(), Order::Spo).unwrap();
        let triples = sorted_triples(Order::Spo, 1, 5);
        let built =
            build_chain(Order::Spo, 1, &triples, PAGE_SIZE, Codec::None, file.len()).unwrap();
        file.append(&built.bytes).unwrap();
        file.sync().unwrap();
        file.len()
    };

    let file = PageFile::open(dir.path(), Order::Spo).unwrap();
    assert_eq!(file.len(), len);
}
