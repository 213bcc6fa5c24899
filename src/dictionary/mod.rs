//! Dictionary — bidirectional mapping between external strings and ids.
//!
//! External callers name graph nodes and predicates with opaque strings;
//! the storage engine works exclusively with dense 32-bit ids.  The
//! dictionary owns the translation in both directions and persists it in a
//! dedicated append-only file (`<db>.dictionary`).
//!
//! # On-disk layout
//!
//! ```text
//! [ENTRY_LEN_LE][ENTRY_BYTES][ENTRY_CRC32_LE]
//! [ENTRY_LEN_LE][ENTRY_BYTES][ENTRY_CRC32_LE]
//! ...
//! ```
//!
//! Each entry is an `(id: u32, string)` pair in the crate encoding, CRC32
//! protected over `len || entry_bytes`.  The file is loaded fully at open
//! **before** WAL replay, so every id the WAL references already resolves.
//!
//! # Durability
//!
//! Appends are buffered.  The engine calls [`Dictionary::sync`] before any
//! WAL commit becomes durable, so a crash can at worst lose entries for
//! ids that no durable triple references.  A truncated or corrupt tail is
//! tolerated at load (the damage is logged and loading stops); an id that
//! a surviving triple references but the dictionary cannot resolve is the
//! fatal condition, surfaced as [`DictionaryError::Corrupt`].
//!
//! # Id allocation
//!
//! Ids are handed out sequentially starting at 1 and are **never reused**,
//! even when the referring triples are deleted.  Id 0 is reserved.

#[cfg(test)]
mod tests;

use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::encoding::{self, EncodingError};

const U32_SIZE: usize = size_of::<u32>();

/// Ids start here; 0 is reserved as an invalid/absent marker.
const FIRST_ID: u32 = 1;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by dictionary operations.
#[derive(Debug, Error)]
pub enum DictionaryError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// An id referenced by a triple has no string entry.
    #[error("Dictionary corrupt: id {0} has no string entry")]
    Corrupt(u32),

    /// The 32-bit id space is exhausted.
    #[error("Dictionary full: id space exhausted")]
    Full,
}

// ------------------------------------------------------------------------------------------------
// Dictionary core
// ------------------------------------------------------------------------------------------------

/// Bidirectional string↔id mapping backed by an append-only log file.
#[derive(Debug)]
pub struct Dictionary {
    /// Path of the dictionary file.
    path: PathBuf,

    /// Buffered appender positioned at end-of-file.
    writer: BufWriter<File>,

    /// Forward mapping: string → id.
    by_name: HashMap<String, u32>,

    /// Reverse mapping: id → string.
    by_id: HashMap<u32, String>,

    /// Next id to allocate.
    next_id: u32,
}

impl Dictionary {
    /// Opens (or creates) the dictionary file and loads all valid entries.
    ///
    /// A corrupt or truncated tail stops loading with a warning — entries
    /// before the damage remain usable, and the next append overwrites the
    /// damaged tail region.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DictionaryError> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;

        let mut by_name = HashMap::new();
        let mut by_id = HashMap::new();
        let mut next_id = FIRST_ID;
        let mut offset = 0usize;
        let mut valid_end = 0usize;

        while offset < raw.len() {
            match Self::decode_entry(&raw[offset..]) {
                Ok(Some((id, name, consumed))) => {
                    offset += consumed;
                    valid_end = offset;
                    if id >= next_id {
                        next_id = id + 1;
                    }
                    by_name.insert(name.clone(), id);
                    by_id.insert(id, name);
                }
                Ok(None) => {
                    // Truncated tail — a crash mid-append.
                    warn!(
                        path = %path.display(),
                        offset,
                        "dictionary has truncated tail, discarding"
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        offset,
                        error = %e,
                        "dictionary entry corrupt, stopping load"
                    );
                    break;
                }
            }
        }

        // Drop any damaged tail so the next append starts on a clean frame.
        if valid_end < raw.len() {
            file.set_len(valid_end as u64)?;
            file.sync_all()?;
        }

        info!(
            path = %path.display(),
            entries = by_id.len(),
            next_id,
            "dictionary loaded"
        );

        let file = OpenOptions::new().append(true).open(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            by_name,
            by_id,
            next_id,
        })
    }

    /// Returns the id for `name`, allocating and persisting a new entry on
    /// first sight.
    ///
    /// The entry is appended (buffered) **before** the caller writes any
    /// WAL record referencing the id; the engine syncs the dictionary
    /// ahead of every durable commit.
    pub fn intern(&mut self, name: &str) -> Result<u32, DictionaryError> {
        if let Some(&id) = self.by_name.get(name) {
            return Ok(id);
        }

        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1).ok_or(DictionaryError::Full)?;

        self.append_entry(id, name)?;

        self.by_name.insert(name.to_string(), id);
        self.by_id.insert(id, name.to_string());

        debug!(id, name, "dictionary entry interned");
        Ok(id)
    }

    /// Returns the id for `name` without allocating.
    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Resolves an id back to its string.
    ///
    /// Fails with [`DictionaryError::Corrupt`] when the id was never
    /// interned — a triple referencing it points at lost dictionary state.
    pub fn resolve(&self, id: u32) -> Result<&str, DictionaryError> {
        self.by_id
            .get(&id)
            .map(String::as_str)
            .ok_or(DictionaryError::Corrupt(id))
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns `true` when no string has been interned.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Flushes buffered appends and fsyncs the file.
    pub fn sync(&mut self) -> Result<(), DictionaryError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Path of the underlying dictionary file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // --------------------------------------------------------------------
    // Frame helpers
    // --------------------------------------------------------------------

    fn append_entry(&mut self, id: u32, name: &str) -> Result<(), DictionaryError> {
        let mut payload = Vec::with_capacity(U32_SIZE * 2 + name.len());
        encoding::Encode::encode_to(&id, &mut payload)?;
        encoding::Encode::encode_to(&name, &mut payload)?;

        let len = payload.len() as u32;
        let len_bytes = len.to_le_bytes();

        let mut hasher = Crc32::new();
        hasher.update(&len_bytes);
        hasher.update(&payload);
        let crc = hasher.finalize();

        self.writer.write_all(&len_bytes)?;
        self.writer.write_all(&payload)?;
        self.writer.write_all(&crc.to_le_bytes())?;
        Ok(())
    }

    /// Decodes one `(id, name)` frame.  `Ok(None)` means a cleanly
    /// truncated tail (not enough bytes for a whole frame).
    fn decode_entry(buf: &[u8]) -> Result<Option<(u32, String, usize)>, DictionaryError> {
        if buf.len() < U32_SIZE {
            return Ok(None);
        }
        let len_bytes: [u8; 4] = buf[..U32_SIZE]
            .try_into()
            .map_err(|_| EncodingError::Custom("length prefix read failed".into()))?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        let frame_end = U32_SIZE + len + U32_SIZE;
        if buf.len() < frame_end {
            return Ok(None);
        }

        let payload = &buf[U32_SIZE..U32_SIZE + len];
        let crc_bytes: [u8; 4] = buf[U32_SIZE + len..frame_end]
            .try_into()
            .map_err(|_| EncodingError::Custom("checksum read failed".into()))?;
        let stored_crc = u32::from_le_bytes(crc_bytes);

        let mut hasher = Crc32::new();
        hasher.update(&len_bytes);
        hasher.update(payload);
        if hasher.finalize() != stored_crc {
            return Err(DictionaryError::Encoding(EncodingError::Custom(
                "dictionary entry checksum mismatch".into(),
            )));
        }

        let mut offset = 0;
        let (id, n) = <u32 as encoding::Decode>::decode_from(&payload[offset..])?;
        offset += n;
        let (name, _) = <String as encoding::Decode>::decode_from(&payload[offset..])?;

        Ok(Some((id, name, frame_end)))
    }
}
