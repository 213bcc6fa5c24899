//! Page chain builder — serialises one primary's sorted triples into a
//! run of fixed-size pages ready for appending.
//!
//! The builder packs `(a, b)` pairs greedily: a page takes pairs until the
//! raw delta-encoded body would exceed the page capacity, then starts the
//! next page.  Compression is opportunistic per page — a body that does
//! not shrink below the capacity is stored raw and tagged
//! [`Codec::None`], so the database-wide codec is an upper bound, not a
//! promise.
//!
//! Chain offsets are assigned against a caller-provided base offset (the
//! current end of the page file), so the header `next` links and the page
//! table entries can be produced before a single byte hits disk.

use crate::encoding;
use crate::triple::{Order, Triple};

use super::{page_crc, Codec, PageError, PageHeader, NO_NEXT, PAGE_HEADER_SIZE};

/// A fully-serialised page chain for one primary.
#[derive(Debug)]
pub struct BuiltChain {
    /// Concatenated page bytes (`offsets.len() * page_size` long).
    pub bytes: Vec<u8>,

    /// Absolute file offsets of the chain's pages, in chain order.
    pub offsets: Vec<u64>,
}

/// Serialises `triples` (all sharing `primary` under `order`, sorted by
/// the ordering's secondary key, duplicate-free) into one or more pages.
///
/// `base_offset` is where the first page will land in the page file.
pub fn build_chain(
    order: Order,
    primary: u32,
    triples: &[Triple],
    page_size: usize,
    codec: Codec,
    base_offset: u64,
) -> Result<BuiltChain, PageError> {
    debug_assert!(page_size > PAGE_HEADER_SIZE);

    let capacity = page_size - PAGE_HEADER_SIZE;

    // 1. Split the pairs into per-page groups by raw encoded size.
    let mut pages: Vec<(Vec<u8>, u32)> = Vec::new();
    let mut body = Vec::with_capacity(capacity);
    let mut count: u32 = 0;
    let mut prev: Option<(u32, u32)> = None;

    for &t in triples {
        let (p, a, b) = order.permute(t);
        if p != primary {
            return Err(PageError::Internal(format!(
                "triple with primary {p} in chain for primary {primary}"
            )));
        }

        let mut encoded = Vec::with_capacity(2 * encoding::MAX_VARINT32_LEN);
        encode_pair(a, b, prev, &mut encoded);

        if body.len() + encoded.len() > capacity && count > 0 {
            pages.push((std::mem::take(&mut body), count));
            count = 0;
            prev = None;
            // Re-encode as the first pair of the fresh page (absolute).
            encoded.clear();
            encode_pair(a, b, None, &mut encoded);
        }

        body.extend_from_slice(&encoded);
        count += 1;
        prev = Some((a, b));
    }
    if count > 0 || pages.is_empty() {
        pages.push((body, count));
    }

    // 2. Serialise each page: compress, header, checksum, pad.
    let page_count = pages.len();
    let mut bytes = Vec::with_capacity(page_count * page_size);
    let mut offsets = Vec::with_capacity(page_count);

    for (i, (raw_body, count)) in pages.into_iter().enumerate() {
        let offset = base_offset + (i * page_size) as u64;
        offsets.push(offset);

        let (stored_body, page_codec) = compress_body(raw_body, codec, capacity);

        let next = if i + 1 < page_count {
            base_offset + ((i + 1) * page_size) as u64
        } else {
            NO_NEXT
        };

        let mut header = PageHeader {
            order,
            primary,
            count,
            next,
            codec: page_codec,
            body_len: stored_body.len() as u32,
            crc: 0,
        };
        let header_bytes = header.encode()?;
        header.crc = page_crc(&header_bytes, &stored_body);
        let header_bytes = header.encode()?;

        bytes.extend_from_slice(&header_bytes);
        bytes.extend_from_slice(&stored_body);
        bytes.resize(bytes.len() + (page_size - PAGE_HEADER_SIZE - stored_body.len()), 0);
    }

    Ok(BuiltChain { bytes, offsets })
}

/// Delta-encodes one pair against its predecessor.
///
/// First pair of a page: absolute `a`, absolute `b`.  Later pairs: delta
/// of `a`; when the delta is zero, `b` is itself a delta (the sort order
/// guarantees it grows), otherwise absolute.
fn encode_pair(a: u32, b: u32, prev: Option<(u32, u32)>, out: &mut Vec<u8>) {
    match prev {
        None => {
            encoding::encode_varint_u32(a, out);
            encoding::encode_varint_u32(b, out);
        }
        Some((pa, pb)) => {
            let da = a - pa;
            encoding::encode_varint_u32(da, out);
            if da == 0 {
                encoding::encode_varint_u32(b - pb, out);
            } else {
                encoding::encode_varint_u32(b, out);
            }
        }
    }
}

/// Applies the requested codec, falling back to raw when compression does
/// not pay for itself or would overflow the page.
fn compress_body(raw: Vec<u8>, codec: Codec, capacity: usize) -> (Vec<u8>, Codec) {
    match codec {
        Codec::None => (raw, Codec::None),
        Codec::Snappy => {
            let mut encoder = snap::raw::Encoder::new();
            match encoder.compress_vec(&raw) {
                Ok(compressed) if compressed.len() < raw.len() && compressed.len() <= capacity => {
                    (compressed, Codec::Snappy)
                }
                _ => (raw, Codec::None),
            }
        }
    }
}
