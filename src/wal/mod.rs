//! Write-Ahead Logging (WAL) Module
//!
//! This module implements the **durable**, **append-only** write-ahead log
//! that makes every mutation crash-safe before it is acknowledged.  The
//! log carries fact insertions/deletions and property writes, framed into
//! transactions, and is replayed at open to rebuild the staging buffer.
//!
//! # On-disk layout
//!
//! The file is a plain sequence of records starting at offset 0:
//!
//! ```text
//! [TYPE:1][LEN:4 LE][CRC32:4 LE][PAYLOAD:LEN]
//! [TYPE:1][LEN:4 LE][CRC32:4 LE][PAYLOAD:LEN]
//! ...
//! ```
//!
//! The CRC32 covers the payload bytes.  Payloads use [`crate::encoding`].
//!
//! # Transactions
//!
//! Records between a `BEGIN` and its matching `COMMIT` are applied
//! atomically on replay.  Records outside any transaction are standalone
//! auto-commits.  A `BEGIN` may carry an optional transaction id and
//! session id used for replay deduplication (see [`TxRegistry`]).
//!
//! # Durability
//!
//! Appends are buffered.  [`Wal::append_commit_durable`] flushes and
//! fsyncs, guaranteeing the commit record and everything before it is on
//! stable storage before returning.  [`Wal::append_commit`] leaves the
//! fsync to a later durable commit, flush, or close.
//!
//! # Recovery
//!
//! [`replay`] scans from offset 0 and maintains `safe_offset` — the byte
//! position immediately after the most recent record that is part of the
//! durable, committed prefix.  Partial transactions at the tail are
//! discarded.  A checksum or framing error stops replay at the last
//! verified record and bumps a warning counter; corruption in the WAL is
//! a truncation event, not a hard failure.

#[cfg(test)]
mod tests;

use std::{
    collections::{HashSet, VecDeque},
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::encoding::{self, EncodingError};
use crate::triple::Triple;

const U32_SIZE: usize = size_of::<u32>();

/// Fixed frame overhead: type byte + length + checksum.
const FRAME_HEADER_SIZE: usize = 1 + U32_SIZE + U32_SIZE;

/// Maximum payload size accepted by writer and replayer (16 MiB).
///
/// Property blobs are the only variable-size payload; anything larger
/// than this is rejected rather than risking an allocation bomb during
/// replay of a corrupted length field.
pub const MAX_RECORD_SIZE: u32 = 16 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Record exceeds [`MAX_RECORD_SIZE`].
    #[error("Record size exceeds limit ({0} bytes)")]
    RecordTooLarge(usize),

    /// Internal consistency error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Record types
// ------------------------------------------------------------------------------------------------

/// A single WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Opens a transaction.  `tx_id`/`session_id` enable replay dedup.
    Begin {
        tx_id: Option<String>,
        session_id: Option<String>,
    },

    /// Fact insertion.
    AddTriple(Triple),

    /// Fact deletion (tombstone).
    DeleteTriple(Triple),

    /// Node property blob replacement.
    SetNodeProps { node: u32, blob: Vec<u8> },

    /// Edge property blob replacement.
    SetEdgeProps { triple: Triple, blob: Vec<u8> },

    /// Closes the open transaction, making its records visible on replay.
    Commit,

    /// Discards the open transaction.
    Abort,
}

impl WalRecord {
    const TAG_BEGIN: u8 = 1;
    const TAG_ADD_TRIPLE: u8 = 2;
    const TAG_DEL_TRIPLE: u8 = 3;
    const TAG_SET_NODE_PROPS: u8 = 4;
    const TAG_SET_EDGE_PROPS: u8 = 5;
    const TAG_COMMIT: u8 = 6;
    const TAG_ABORT: u8 = 7;

    fn tag(&self) -> u8 {
        match self {
            WalRecord::Begin { .. } => Self::TAG_BEGIN,
            WalRecord::AddTriple(_) => Self::TAG_ADD_TRIPLE,
            WalRecord::DeleteTriple(_) => Self::TAG_DEL_TRIPLE,
            WalRecord::SetNodeProps { .. } => Self::TAG_SET_NODE_PROPS,
            WalRecord::SetEdgeProps { .. } => Self::TAG_SET_EDGE_PROPS,
            WalRecord::Commit => Self::TAG_COMMIT,
            WalRecord::Abort => Self::TAG_ABORT,
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::new();
        match self {
            WalRecord::Begin { tx_id, session_id } => {
                encoding::Encode::encode_to(tx_id, &mut buf)?;
                encoding::Encode::encode_to(session_id, &mut buf)?;
            }
            WalRecord::AddTriple(t) | WalRecord::DeleteTriple(t) => {
                encoding::Encode::encode_to(t, &mut buf)?;
            }
            WalRecord::SetNodeProps { node, blob } => {
                encoding::Encode::encode_to(node, &mut buf)?;
                encoding::Encode::encode_to(blob, &mut buf)?;
            }
            WalRecord::SetEdgeProps { triple, blob } => {
                encoding::Encode::encode_to(triple, &mut buf)?;
                encoding::Encode::encode_to(blob, &mut buf)?;
            }
            WalRecord::Commit | WalRecord::Abort => {}
        }
        Ok(buf)
    }

    fn decode(tag: u8, payload: &[u8]) -> Result<Self, EncodingError> {
        match tag {
            Self::TAG_BEGIN => {
                let mut offset = 0;
                let (tx_id, n) = <Option<String> as encoding::Decode>::decode_from(payload)?;
                offset += n;
                let (session_id, _) =
                    <Option<String> as encoding::Decode>::decode_from(&payload[offset..])?;
                Ok(WalRecord::Begin { tx_id, session_id })
            }
            Self::TAG_ADD_TRIPLE => {
                let (t, _) = <Triple as encoding::Decode>::decode_from(payload)?;
                Ok(WalRecord::AddTriple(t))
            }
            Self::TAG_DEL_TRIPLE => {
                let (t, _) = <Triple as encoding::Decode>::decode_from(payload)?;
                Ok(WalRecord::DeleteTriple(t))
            }
            Self::TAG_SET_NODE_PROPS => {
                let mut offset = 0;
                let (node, n) = <u32 as encoding::Decode>::decode_from(payload)?;
                offset += n;
                let (blob, _) = <Vec<u8> as encoding::Decode>::decode_from(&payload[offset..])?;
                Ok(WalRecord::SetNodeProps { node, blob })
            }
            Self::TAG_SET_EDGE_PROPS => {
                let mut offset = 0;
                let (triple, n) = <Triple as encoding::Decode>::decode_from(payload)?;
                offset += n;
                let (blob, _) = <Vec<u8> as encoding::Decode>::decode_from(&payload[offset..])?;
                Ok(WalRecord::SetEdgeProps { triple, blob })
            }
            Self::TAG_COMMIT => Ok(WalRecord::Commit),
            Self::TAG_ABORT => Ok(WalRecord::Abort),
            other => Err(EncodingError::InvalidTag {
                tag: other as u32,
                type_name: "WalRecord",
            }),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// WAL writer
// ------------------------------------------------------------------------------------------------

/// Buffered, append-only WAL writer.
///
/// The writer tracks the logical end offset (including buffered bytes),
/// which callers use as the durable offset absorbed by a flush.
#[derive(Debug)]
pub struct Wal {
    /// Buffered appender.
    writer: BufWriter<File>,

    /// Path to the WAL file.
    path: PathBuf,

    /// Logical end offset (file bytes + buffered bytes).
    offset: u64,
}

impl Wal {
    /// Opens or creates the WAL file at `path`, positioned for appending.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let offset = file.metadata()?.len();

        info!(path = %path.display(), offset, "WAL opened");

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            offset,
        })
    }

    /// Logical end offset: where the next record will start.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Path of the WAL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a `BEGIN` record.  Returns the offset after the record.
    pub fn append_begin(
        &mut self,
        tx_id: Option<String>,
        session_id: Option<String>,
    ) -> Result<u64, WalError> {
        self.append(&WalRecord::Begin { tx_id, session_id })
    }

    /// Appends an `ADD_TRIPLE` record.
    pub fn append_add_triple(&mut self, triple: Triple) -> Result<u64, WalError> {
        self.append(&WalRecord::AddTriple(triple))
    }

    /// Appends a `DEL_TRIPLE` record.
    pub fn append_delete_triple(&mut self, triple: Triple) -> Result<u64, WalError> {
        self.append(&WalRecord::DeleteTriple(triple))
    }

    /// Appends a `SET_NODE_PROPS` record.
    pub fn append_set_node_props(&mut self, node: u32, blob: &[u8]) -> Result<u64, WalError> {
        self.append(&WalRecord::SetNodeProps {
            node,
            blob: blob.to_vec(),
        })
    }

    /// Appends a `SET_EDGE_PROPS` record.
    pub fn append_set_edge_props(&mut self, triple: Triple, blob: &[u8]) -> Result<u64, WalError> {
        self.append(&WalRecord::SetEdgeProps {
            triple,
            blob: blob.to_vec(),
        })
    }

    /// Appends a `COMMIT` record without forcing it to disk.
    pub fn append_commit(&mut self) -> Result<u64, WalError> {
        self.append(&WalRecord::Commit)
    }

    /// Appends a `COMMIT` record and fsyncs.
    ///
    /// On return the commit and **all prior appends** are durable.
    pub fn append_commit_durable(&mut self) -> Result<u64, WalError> {
        let offset = self.append(&WalRecord::Commit)?;
        self.sync()?;
        Ok(offset)
    }

    /// Appends an `ABORT` record.
    pub fn append_abort(&mut self) -> Result<u64, WalError> {
        self.append(&WalRecord::Abort)
    }

    /// Flushes buffered records and fsyncs the file.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Truncates the WAL to `offset` bytes.
    ///
    /// The caller must have verified `offset` is a safe offset (the end of
    /// a committed, fully-parsed record) via [`replay`].  Used after a
    /// flush absorbed the WAL prefix into pages.
    pub fn truncate_to(&mut self, offset: u64) -> Result<(), WalError> {
        self.writer.flush()?;
        let file = self.writer.get_mut();
        file.set_len(offset)?;
        file.seek(SeekFrom::End(0))?;
        file.sync_all()?;
        self.offset = offset;

        info!(path = %self.path.display(), offset, "WAL truncated");
        Ok(())
    }

    /// Clears the WAL entirely.
    pub fn reset(&mut self) -> Result<(), WalError> {
        self.truncate_to(0)
    }

    // --------------------------------------------------------------------
    // Frame writer
    // --------------------------------------------------------------------

    fn append(&mut self, record: &WalRecord) -> Result<u64, WalError> {
        let payload = record.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| WalError::RecordTooLarge(payload.len()))?;
        if len > MAX_RECORD_SIZE {
            return Err(WalError::RecordTooLarge(payload.len()));
        }

        let mut hasher = Crc32::new();
        hasher.update(&payload);
        let crc = hasher.finalize();

        self.writer.write_all(&[record.tag()])?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.write_all(&payload)?;

        self.offset += (FRAME_HEADER_SIZE + payload.len()) as u64;

        trace!(
            tag = record.tag(),
            len,
            offset = self.offset,
            "WAL record appended"
        );
        Ok(self.offset)
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            warn!(path = %self.path.display(), error = %e, "WAL sync failed on drop");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Replay
// ------------------------------------------------------------------------------------------------

/// A transaction observed committed during replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTx {
    /// Transaction id from the `BEGIN` record, if any.
    pub id: Option<String>,

    /// Session id from the `BEGIN` record, if any.
    pub session_id: Option<String>,
}

/// A committed mutation recovered from the WAL, in commit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalEvent {
    /// Fact insertion.
    AddTriple(Triple),

    /// Fact deletion.
    DeleteTriple(Triple),

    /// Node property write.
    SetNodeProps { node: u32, blob: Vec<u8> },

    /// Edge property write.
    SetEdgeProps { triple: Triple, blob: Vec<u8> },
}

/// Result of a WAL replay.
#[derive(Debug, Default)]
pub struct WalReplay {
    /// Byte position immediately after the last record belonging to the
    /// committed prefix.  Truncating to this offset loses nothing durable.
    pub safe_offset: u64,

    /// Transactions whose `COMMIT` was observed, in commit order.
    /// Standalone auto-commit records do not appear here.
    pub committed_txs: Vec<CommittedTx>,

    /// Committed mutations in commit order (transactions expand to their
    /// records at the commit point).
    pub events: Vec<WalEvent>,

    /// Number of corruption events observed (checksum mismatch, framing
    /// damage, truncated tail mid-transaction).
    pub warnings: u32,

    /// Number of transactions skipped by dedup.
    pub deduplicated: u32,
}

/// Replays the WAL at `path` from offset 0.
///
/// `registry`, when present, suppresses transactions whose id is already
/// known — their records are consumed (and `safe_offset` advanced past
/// their `COMMIT`) without producing events.
///
/// Corruption never fails replay: scanning stops at the last verified
/// record, the partial tail is discarded, and `warnings` is bumped.
pub fn replay<P: AsRef<Path>>(
    path: P,
    registry: Option<&TxRegistry>,
) -> Result<WalReplay, WalError> {
    let path = path.as_ref();
    debug!(path = %path.display(), "WAL replay started");

    let mut raw = Vec::new();
    match File::open(path) {
        Ok(mut f) => {
            f.read_to_end(&mut raw)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(WalReplay::default());
        }
        Err(e) => return Err(WalError::Io(e)),
    }

    let mut out = WalReplay::default();
    let mut offset = 0usize;

    // Open transaction state: (tx, its events, whether dedup drops it).
    let mut pending: Option<(CommittedTx, Vec<WalEvent>, bool)> = None;

    while offset < raw.len() {
        let record = match read_frame(&raw[offset..]) {
            FrameResult::Record { record, consumed } => {
                offset += consumed;
                record
            }
            FrameResult::Truncated => {
                warn!(offset, "WAL truncated tail, discarding");
                out.warnings += 1;
                break;
            }
            FrameResult::Corrupt(reason) => {
                warn!(offset, reason, "WAL corrupt record, stopping replay");
                out.warnings += 1;
                break;
            }
        };

        match record {
            WalRecord::Begin { tx_id, session_id } => {
                if pending.is_some() {
                    // Nested BEGIN — the earlier transaction never
                    // committed and cannot anymore.
                    warn!(offset, "WAL BEGIN while transaction open, discarding earlier");
                    out.warnings += 1;
                }
                let dedup = match (&tx_id, registry) {
                    (Some(id), Some(reg)) => reg.contains(id),
                    _ => false,
                };
                pending = Some((
                    CommittedTx {
                        id: tx_id,
                        session_id,
                    },
                    Vec::new(),
                    dedup,
                ));
            }

            WalRecord::Commit => match pending.take() {
                Some((tx, events, dedup)) => {
                    if dedup {
                        out.deduplicated += 1;
                        trace!(tx_id = ?tx.id, "WAL transaction skipped by dedup");
                    } else {
                        out.events.extend(events);
                        out.committed_txs.push(tx);
                    }
                    out.safe_offset = offset as u64;
                }
                None => {
                    // COMMIT with no BEGIN: treat as a resolved no-op.
                    out.safe_offset = offset as u64;
                }
            },

            WalRecord::Abort => {
                pending = None;
                out.safe_offset = offset as u64;
            }

            other => {
                let event = match other {
                    WalRecord::AddTriple(t) => WalEvent::AddTriple(t),
                    WalRecord::DeleteTriple(t) => WalEvent::DeleteTriple(t),
                    WalRecord::SetNodeProps { node, blob } => {
                        WalEvent::SetNodeProps { node, blob }
                    }
                    WalRecord::SetEdgeProps { triple, blob } => {
                        WalEvent::SetEdgeProps { triple, blob }
                    }
                    // Begin/Commit/Abort handled above.
                    _ => continue,
                };
                match pending.as_mut() {
                    Some((_, events, _)) => events.push(event),
                    None => {
                        // Standalone auto-commit record.
                        out.events.push(event);
                        out.safe_offset = offset as u64;
                    }
                }
            }
        }
    }

    if pending.is_some() {
        debug!("WAL ends with open transaction, discarded");
    }

    info!(
        path = %path.display(),
        safe_offset = out.safe_offset,
        events = out.events.len(),
        txs = out.committed_txs.len(),
        warnings = out.warnings,
        "WAL replay finished"
    );

    Ok(out)
}

enum FrameResult {
    Record { record: WalRecord, consumed: usize },
    Truncated,
    Corrupt(&'static str),
}

/// Reads one frame from the front of `buf`.
fn read_frame(buf: &[u8]) -> FrameResult {
    if buf.len() < FRAME_HEADER_SIZE {
        return FrameResult::Truncated;
    }

    let tag = buf[0];
    let len_bytes: [u8; 4] = match buf[1..1 + U32_SIZE].try_into() {
        Ok(b) => b,
        Err(_) => return FrameResult::Corrupt("length prefix"),
    };
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_RECORD_SIZE {
        return FrameResult::Corrupt("record length over limit");
    }

    let crc_bytes: [u8; 4] = match buf[1 + U32_SIZE..FRAME_HEADER_SIZE].try_into() {
        Ok(b) => b,
        Err(_) => return FrameResult::Corrupt("checksum field"),
    };
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let end = FRAME_HEADER_SIZE + len as usize;
    if buf.len() < end {
        return FrameResult::Truncated;
    }

    let payload = &buf[FRAME_HEADER_SIZE..end];
    let mut hasher = Crc32::new();
    hasher.update(payload);
    if hasher.finalize() != stored_crc {
        return FrameResult::Corrupt("checksum mismatch");
    }

    match WalRecord::decode(tag, payload) {
        Ok(record) => FrameResult::Record {
            record,
            consumed: end,
        },
        Err(_) => FrameResult::Corrupt("payload decode"),
    }
}

// ------------------------------------------------------------------------------------------------
// Persistent transaction-id registry
// ------------------------------------------------------------------------------------------------

/// Persisted form of [`TxRegistry`] (`txids.json`).
#[derive(Debug, Serialize, Deserialize)]
struct TxRegistryDoc {
    version: u32,
    ids: Vec<String>,
}

/// FIFO-capped registry of transaction ids already applied.
///
/// When enabled, replay skips any `BEGIN` carrying a known id, making
/// re-delivered transactions idempotent across restarts.  Persisted as a
/// small JSON document next to the page files.
#[derive(Debug)]
pub struct TxRegistry {
    path: PathBuf,
    cap: usize,
    order: VecDeque<String>,
    known: HashSet<String>,
}

impl TxRegistry {
    const DOC_VERSION: u32 = 1;

    /// Loads the registry from `path`, or starts empty if absent or
    /// unreadable (dedup state is an optimisation, never ground truth).
    pub fn load<P: AsRef<Path>>(path: P, cap: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut reg = Self {
            path,
            cap,
            order: VecDeque::new(),
            known: HashSet::new(),
        };

        let raw = match fs::read(&reg.path) {
            Ok(raw) => raw,
            Err(_) => return reg,
        };
        match serde_json::from_slice::<TxRegistryDoc>(&raw) {
            Ok(doc) => {
                for id in doc.ids {
                    reg.remember(id);
                }
            }
            Err(e) => {
                warn!(path = %reg.path.display(), error = %e, "txid registry unreadable, starting empty");
            }
        }
        reg
    }

    /// Returns `true` when `id` has been applied before.
    pub fn contains(&self, id: &str) -> bool {
        self.known.contains(id)
    }

    /// Records `id`, evicting the oldest entries beyond the cap.
    pub fn remember(&mut self, id: String) {
        if self.known.contains(&id) {
            return;
        }
        self.known.insert(id.clone());
        self.order.push_back(id);
        while self.order.len() > self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.known.remove(&evicted);
            }
        }
    }

    /// Number of remembered ids.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` when no id is remembered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Persists the registry atomically (tmp + rename).
    pub fn persist(&self) -> Result<(), WalError> {
        let doc = TxRegistryDoc {
            version: Self::DOC_VERSION,
            ids: self.order.iter().cloned().collect(),
        };
        let raw = serde_json::to_vec(&doc)
            .map_err(|e| WalError::Internal(format!("txid registry serialize: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut f = File::create(&tmp)?;
            f.write_all(&raw)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
