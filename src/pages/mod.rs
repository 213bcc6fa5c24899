//! Paged index module — fixed-size page files for the three orderings.
//!
//! Each ordering (SPO, POS, OSP) owns one append-only file of fixed-size
//! pages (`pages.SPO`, `pages.POS`, `pages.OSP`).  A page holds a
//! contiguous run of triples for a **single primary**; a primary whose
//! triples exceed one page spans a *page chain* — an ordered list of page
//! offsets recorded in the manifest's page table (and mirrored by a
//! next-offset field in each header, kept for offline repair).
//!
//! Pages are **immutable** once written: mutation means appending fresh
//! pages and repointing the page table, which turns the old pages into
//! orphans until GC reclaims them.
//!
//! # On-disk layout
//!
//! Every page occupies exactly `page_size` bytes:
//!
//! ```text
//! [MAGIC:4][ORDER:1][PRIMARY:4][COUNT:4][NEXT:8][CODEC:1][BODY_LEN:4][CRC32:4]
//! [BODY:BODY_LEN][ZERO PADDING]
//! ```
//!
//! The CRC32 covers the header (with the CRC field zeroed) followed by the
//! body bytes.  The body is the page's `(a, b)` secondary pairs in sorted
//! order, delta-encoded as LEB128 varints and optionally Snappy-compressed
//! (per-page codec tag — a page whose compressed body would not fit falls
//! back to the raw encoding).
//!
//! # Failure semantics
//!
//! A checksum or framing failure on read surfaces [`PageError::Corrupt`]
//! with the ordering and offset; the caller must refuse the whole chain's
//! query result.  Append-time failures are recoverable because the
//! manifest has not been swapped yet — the partial bytes are unreferenced.

pub mod builder;

#[cfg(test)]
mod tests;

pub use builder::{build_chain, BuiltChain};

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::trace;

use crate::encoding::{self, EncodingError};
use crate::triple::{Order, Triple};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Page magic bytes.
pub(crate) const PAGE_MAGIC: [u8; 4] = *b"TPG1";

/// Encoded page header size in bytes.
pub const PAGE_HEADER_SIZE: usize = 4 + 1 + 4 + 4 + 8 + 1 + 4 + 4;

/// Default page size (1 KiB).
pub const DEFAULT_PAGE_SIZE: usize = 1024;

/// Smallest accepted page size — a page must fit its header plus at least
/// one worst-case encoded pair.
pub const MIN_PAGE_SIZE: usize = 64;

/// Sentinel for "no next page in chain".
pub const NO_NEXT: u64 = u64::MAX;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by page file operations.
#[derive(Debug, Error)]
pub enum PageError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Page failed integrity validation.  Query results over the owning
    /// chain must be refused.
    #[error("Corrupt page in {order} at offset {offset}: {reason}")]
    Corrupt {
        /// Ordering name ("SPO", …).
        order: &'static str,
        /// Byte offset of the damaged page.
        offset: u64,
        /// What failed.
        reason: &'static str,
    },

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Codec
// ------------------------------------------------------------------------------------------------

/// Page body compression codec.
///
/// The manifest carries the database-wide codec; each page additionally
/// tags the codec it was actually written with, so a page that would not
/// compress below the page capacity can fall back to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Raw delta-encoded body.
    #[default]
    None,

    /// Snappy-compressed body.
    Snappy,
}

impl Codec {
    /// One-byte tag stored in page headers.
    pub fn tag(self) -> u8 {
        match self {
            Codec::None => 0,
            Codec::Snappy => 1,
        }
    }

    /// Inverse of [`Codec::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Codec::None),
            1 => Some(Codec::Snappy),
            _ => None,
        }
    }

    /// Lowercase name used in the manifest document.
    pub fn name(self) -> &'static str {
        match self {
            Codec::None => "none",
            Codec::Snappy => "snappy",
        }
    }

    /// Parses a manifest codec name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Codec::None),
            "snappy" => Some(Codec::Snappy),
            _ => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Page header
// ------------------------------------------------------------------------------------------------

/// Decoded page header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageHeader {
    /// Ordering this page belongs to.
    pub(crate) order: Order,

    /// Primary id grouping every triple in the page.
    pub(crate) primary: u32,

    /// Number of `(a, b)` pairs in the body.
    pub(crate) count: u32,

    /// Offset of the next page in the chain, or [`NO_NEXT`].
    pub(crate) next: u64,

    /// Codec the body was written with.
    pub(crate) codec: Codec,

    /// Stored body length in bytes (compressed size when compressed).
    pub(crate) body_len: u32,

    /// CRC32 over header-with-crc-zeroed plus body.
    pub(crate) crc: u32,
}

impl PageHeader {
    pub(crate) fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::with_capacity(PAGE_HEADER_SIZE);
        encoding::Encode::encode_to(&PAGE_MAGIC, &mut buf)?;
        encoding::Encode::encode_to(&self.order.tag(), &mut buf)?;
        encoding::Encode::encode_to(&self.primary, &mut buf)?;
        encoding::Encode::encode_to(&self.count, &mut buf)?;
        encoding::Encode::encode_to(&self.next, &mut buf)?;
        encoding::Encode::encode_to(&self.codec.tag(), &mut buf)?;
        encoding::Encode::encode_to(&self.body_len, &mut buf)?;
        encoding::Encode::encode_to(&self.crc, &mut buf)?;
        Ok(buf)
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self, &'static str> {
        if buf.len() < PAGE_HEADER_SIZE {
            return Err("short header");
        }
        let mut offset = 0;
        let (magic, n) = <[u8; 4] as encoding::Decode>::decode_from(buf).map_err(|_| "magic")?;
        offset += n;
        if magic != PAGE_MAGIC {
            return Err("bad magic");
        }
        let (order_tag, n) =
            <u8 as encoding::Decode>::decode_from(&buf[offset..]).map_err(|_| "order tag")?;
        offset += n;
        let order = Order::from_tag(order_tag).ok_or("unknown order tag")?;
        let (primary, n) =
            <u32 as encoding::Decode>::decode_from(&buf[offset..]).map_err(|_| "primary")?;
        offset += n;
        let (count, n) =
            <u32 as encoding::Decode>::decode_from(&buf[offset..]).map_err(|_| "count")?;
        offset += n;
        let (next, n) =
            <u64 as encoding::Decode>::decode_from(&buf[offset..]).map_err(|_| "next offset")?;
        offset += n;
        let (codec_tag, n) =
            <u8 as encoding::Decode>::decode_from(&buf[offset..]).map_err(|_| "codec tag")?;
        offset += n;
        let codec = Codec::from_tag(codec_tag).ok_or("unknown codec tag")?;
        let (body_len, n) =
            <u32 as encoding::Decode>::decode_from(&buf[offset..]).map_err(|_| "body length")?;
        offset += n;
        let (crc, _) =
            <u32 as encoding::Decode>::decode_from(&buf[offset..]).map_err(|_| "checksum")?;
        Ok(Self {
            order,
            primary,
            count,
            next,
            codec,
            body_len,
            crc,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Page decoding (shared by writer-side reads and snapshot mmap reads)
// ------------------------------------------------------------------------------------------------

/// CRC32 over the header bytes (crc field zeroed) followed by the body.
pub(crate) fn page_crc(header_bytes: &[u8], body: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(&header_bytes[..PAGE_HEADER_SIZE - 4]);
    hasher.update(&[0u8; 4]);
    hasher.update(body);
    hasher.finalize()
}

/// Decodes one page from `page_bytes` (exactly `page_size` bytes starting
/// at the page boundary) and appends its triples to `out`.
///
/// Validates magic, ordering, primary, checksum, and the pair count.
pub(crate) fn decode_page(
    page_bytes: &[u8],
    order: Order,
    expected_primary: u32,
    offset: u64,
    out: &mut Vec<Triple>,
) -> Result<PageHeader, PageError> {
    let corrupt = |reason: &'static str| PageError::Corrupt {
        order: order.name(),
        offset,
        reason,
    };

    let header = PageHeader::decode(page_bytes).map_err(corrupt)?;

    if header.order != order {
        return Err(corrupt("ordering mismatch"));
    }
    if header.primary != expected_primary {
        return Err(corrupt("primary mismatch"));
    }

    let body_end = PAGE_HEADER_SIZE + header.body_len as usize;
    if body_end > page_bytes.len() {
        return Err(corrupt("body length exceeds page"));
    }
    let body = &page_bytes[PAGE_HEADER_SIZE..body_end];

    if page_crc(&page_bytes[..PAGE_HEADER_SIZE], body) != header.crc {
        return Err(corrupt("checksum mismatch"));
    }

    let raw = match header.codec {
        Codec::None => body.to_vec(),
        Codec::Snappy => snap::raw::Decoder::new()
            .decompress_vec(body)
            .map_err(|_| corrupt("decompression failed"))?,
    };

    decode_body(&raw, header.count, order, header.primary, out).map_err(|_| corrupt("body decode"))?;

    Ok(header)
}

/// Decodes a delta-encoded body of `count` pairs.
fn decode_body(
    raw: &[u8],
    count: u32,
    order: Order,
    primary: u32,
    out: &mut Vec<Triple>,
) -> Result<(), EncodingError> {
    let mut offset = 0usize;
    let mut prev_a: u32 = 0;
    let mut prev_b: u32 = 0;

    for i in 0..count {
        let (da, n) = encoding::decode_varint_u32(&raw[offset..])?;
        offset += n;
        let (vb, n) = encoding::decode_varint_u32(&raw[offset..])?;
        offset += n;

        let (a, b) = if i == 0 {
            (da, vb)
        } else if da == 0 {
            // Same secondary-a: vb is a delta from the previous b.
            let b = prev_b
                .checked_add(vb)
                .ok_or(EncodingError::MalformedVarint)?;
            (prev_a, b)
        } else {
            let a = prev_a
                .checked_add(da)
                .ok_or(EncodingError::MalformedVarint)?;
            (a, vb)
        };

        prev_a = a;
        prev_b = b;
        out.push(order.restore(primary, a, b));
    }

    if offset != raw.len() {
        return Err(EncodingError::Custom("trailing bytes in page body".into()));
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Chain reads over an arbitrary byte image
// ------------------------------------------------------------------------------------------------

/// Reads a whole chain from a byte image of the page file (an mmap or a
/// freshly-read buffer).  Returns the chain's triples in sorted order.
pub(crate) fn read_chain_from(
    image: &[u8],
    order: Order,
    primary: u32,
    offsets: &[u64],
    page_size: usize,
) -> Result<Vec<Triple>, PageError> {
    let mut out = Vec::new();
    for &offset in offsets {
        let start = usize::try_from(offset).map_err(|_| PageError::Corrupt {
            order: order.name(),
            offset,
            reason: "offset out of range",
        })?;
        let end = start.checked_add(page_size).filter(|&e| e <= image.len()).ok_or(
            PageError::Corrupt {
                order: order.name(),
                offset,
                reason: "page past end of file",
            },
        )?;
        decode_page(&image[start..end], order, primary, offset, &mut out)?;
    }
    Ok(out)
}

// ------------------------------------------------------------------------------------------------
// PageFile — writer-side handle for one ordering
// ------------------------------------------------------------------------------------------------

/// Writer-side handle to one ordering's page file.
///
/// The writer appends; reads during flush/compaction go through
/// positional reads on the same handle.  Snapshot readers never use this
/// type — they map the file themselves (see the mvcc module).
#[derive(Debug)]
pub struct PageFile {
    file: File,
    path: PathBuf,
    order: Order,

    /// Current end-of-file; the base offset for the next appended chain.
    len: u64,
}

impl PageFile {
    /// Opens (or creates) the page file for `order` inside `dir`.
    pub fn open(dir: &Path, order: Order) -> Result<Self, PageError> {
        let path = dir.join(order.file_name());
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            path,
            order,
            len,
        })
    }

    /// Ordering this file belongs to.
    pub fn order(&self) -> Order {
        self.order
    }

    /// Current file length (the next append offset).
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` when the file holds no pages.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path of the page file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends pre-built page bytes (a whole number of pages) at the end.
    ///
    /// The caller computed chain offsets against [`PageFile::len`] before
    /// building; nothing references the new pages until the manifest swap.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), PageError> {
        self.file.write_all(bytes)?;
        self.len += bytes.len() as u64;
        trace!(
            order = self.order.name(),
            appended = bytes.len(),
            len = self.len,
            "pages appended"
        );
        Ok(())
    }

    /// Fsyncs the page file.  Called before the manifest swap so every
    /// referenced page is durable first.
    pub fn sync(&self) -> Result<(), PageError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Reads the chain `offsets` for `primary`, returning sorted triples.
    pub fn read_chain(
        &self,
        primary: u32,
        offsets: &[u64],
        page_size: usize,
    ) -> Result<Vec<Triple>, PageError> {
        use std::os::unix::fs::FileExt;

        let mut out = Vec::new();
        let mut page = vec![0u8; page_size];
        for &offset in offsets {
            self.file.read_exact_at(&mut page, offset).map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    PageError::Corrupt {
                        order: self.order.name(),
                        offset,
                        reason: "page past end of file",
                    }
                } else {
                    PageError::Io(e)
                }
            })?;
            decode_page(&page, self.order, primary, offset, &mut out)?;
        }
        Ok(out)
    }

    /// Reads one page's raw bytes without decoding the body.
    pub(crate) fn read_page_raw(
        &self,
        offset: u64,
        page_size: usize,
    ) -> Result<Vec<u8>, PageError> {
        use std::os::unix::fs::FileExt;

        let mut page = vec![0u8; page_size];
        self.file.read_exact_at(&mut page, offset).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                PageError::Corrupt {
                    order: self.order.name(),
                    offset,
                    reason: "page past end of file",
                }
            } else {
                PageError::Io(e)
            }
        })?;
        Ok(page)
    }

    /// Re-opens the handle after GC replaced the file under this path.
    pub fn reopen(&mut self) -> Result<(), PageError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        self.len = file.metadata()?.len();
        self.file = file;
        Ok(())
    }
}
