//! Property store — opaque blobs attached to nodes and edges.
//!
//! A side map from node id (and edge triple) to an uninterpreted byte
//! blob.  Blobs are typed by the caller; the store never looks inside
//! them.
//!
//! Writes stage through the WAL like facts do; flush persists the whole
//! map to `props.bin` inside the pages directory.  The file is the crate
//! encoding of both maps followed by a CRC32 trailer, swapped atomically
//! (tmp + fsync + rename + dir fsync) so a crash mid-flush leaves the
//! previous generation intact.

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Read, Write},
    path::Path,
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, info};

use crate::encoding::{self, EncodingError};
use crate::manifest::fsync_dir;
use crate::triple::Triple;

/// Property-store file name inside the pages directory.
pub const PROPS_FILENAME: &str = "props.bin";

const PROPS_MAGIC: [u8; 4] = *b"TPRP";
const PROPS_VERSION: u32 = 1;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by property-store operations.
#[derive(Debug, Error)]
pub enum PropsError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The file failed integrity validation.
    #[error("Property store corrupt: {0}")]
    Corrupt(&'static str),
}

// ------------------------------------------------------------------------------------------------
// Store
// ------------------------------------------------------------------------------------------------

/// Persistent side map of node and edge property blobs.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PropertyStore {
    nodes: BTreeMap<u32, Vec<u8>>,
    edges: BTreeMap<Triple, Vec<u8>>,
}

impl PropertyStore {
    /// Loads the store from `dir`, or returns an empty store for a fresh
    /// database.  A present-but-damaged file is an error — silently
    /// dropping property data would be worse than failing the open.
    pub fn load(dir: &Path) -> Result<Self, PropsError> {
        let path = dir.join(PROPS_FILENAME);
        let mut raw = Vec::new();
        match File::open(&path) {
            Ok(mut f) => {
                f.read_to_end(&mut raw)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(PropsError::Io(e)),
        }

        if raw.len() < 4 {
            return Err(PropsError::Corrupt("file shorter than checksum trailer"));
        }
        let (payload, crc_bytes) = raw.split_at(raw.len() - 4);
        let stored_crc = u32::from_le_bytes(
            crc_bytes
                .try_into()
                .map_err(|_| PropsError::Corrupt("checksum trailer"))?,
        );
        let mut hasher = Crc32::new();
        hasher.update(payload);
        if hasher.finalize() != stored_crc {
            return Err(PropsError::Corrupt("checksum mismatch"));
        }

        let mut offset = 0usize;
        let (magic, n) = <[u8; 4] as encoding::Decode>::decode_from(payload)?;
        offset += n;
        if magic != PROPS_MAGIC {
            return Err(PropsError::Corrupt("bad magic"));
        }
        let (version, n) = <u32 as encoding::Decode>::decode_from(&payload[offset..])?;
        offset += n;
        if version != PROPS_VERSION {
            return Err(PropsError::Corrupt("unsupported version"));
        }

        let (node_entries, n) = encoding::decode_vec::<NodeEntry>(&payload[offset..])?;
        offset += n;
        let (edge_entries, _) = encoding::decode_vec::<EdgeEntry>(&payload[offset..])?;

        let store = Self {
            nodes: node_entries.into_iter().map(|e| (e.node, e.blob)).collect(),
            edges: edge_entries
                .into_iter()
                .map(|e| (e.triple, e.blob))
                .collect(),
        };

        debug!(
            nodes = store.nodes.len(),
            edges = store.edges.len(),
            "property store loaded"
        );
        Ok(store)
    }

    /// Replaces the blob for `node`.
    pub fn set_node(&mut self, node: u32, blob: Vec<u8>) {
        self.nodes.insert(node, blob);
    }

    /// Replaces the blob for `triple`.
    pub fn set_edge(&mut self, triple: Triple, blob: Vec<u8>) {
        self.edges.insert(triple, blob);
    }

    /// Blob stored for `node`, if any.
    pub fn node(&self, node: u32) -> Option<&[u8]> {
        self.nodes.get(&node).map(Vec::as_slice)
    }

    /// Blob stored for `triple`, if any.
    pub fn edge(&self, triple: Triple) -> Option<&[u8]> {
        self.edges.get(&triple).map(Vec::as_slice)
    }

    /// Number of stored blobs (nodes + edges).
    pub fn len(&self) -> usize {
        self.nodes.len() + self.edges.len()
    }

    /// Returns `true` when no blob is stored.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Persists the store atomically into `dir`.
    pub fn store(&self, dir: &Path) -> Result<(), PropsError> {
        let mut payload = Vec::new();
        encoding::Encode::encode_to(&PROPS_MAGIC, &mut payload)?;
        encoding::Encode::encode_to(&PROPS_VERSION, &mut payload)?;

        let node_entries: Vec<NodeEntry> = self
            .nodes
            .iter()
            .map(|(&node, blob)| NodeEntry {
                node,
                blob: blob.clone(),
            })
            .collect();
        let edge_entries: Vec<EdgeEntry> = self
            .edges
            .iter()
            .map(|(&triple, blob)| EdgeEntry {
                triple,
                blob: blob.clone(),
            })
            .collect();
        encoding::encode_vec(&node_entries, &mut payload)?;
        encoding::encode_vec(&edge_entries, &mut payload)?;

        let mut hasher = Crc32::new();
        hasher.update(&payload);
        let crc = hasher.finalize();

        let path = dir.join(PROPS_FILENAME);
        let tmp = dir.join(format!("{PROPS_FILENAME}.tmp"));
        {
            let mut f = File::create(&tmp)?;
            f.write_all(&payload)?;
            f.write_all(&crc.to_le_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        fsync_dir(dir)?;

        info!(
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            "property store persisted"
        );
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Encoding entries
// ------------------------------------------------------------------------------------------------

struct NodeEntry {
    node: u32,
    blob: Vec<u8>,
}

struct EdgeEntry {
    triple: Triple,
    blob: Vec<u8>,
}

impl encoding::Encode for NodeEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.node, buf)?;
        encoding::Encode::encode_to(&self.blob, buf)?;
        Ok(())
    }
}

impl encoding::Decode for NodeEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (node, n) = <u32 as encoding::Decode>::decode_from(buf)?;
        offset += n;
        let (blob, n) = <Vec<u8> as encoding::Decode>::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Self { node, blob }, offset))
    }
}

impl encoding::Encode for EdgeEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.triple, buf)?;
        encoding::Encode::encode_to(&self.blob, buf)?;
        Ok(())
    }
}

impl encoding::Decode for EdgeEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (triple, n) = <Triple as encoding::Decode>::decode_from(buf)?;
        offset += n;
        let (blob, n) = <Vec<u8> as encoding::Decode>::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Self { triple, blob }, offset))
    }
}
