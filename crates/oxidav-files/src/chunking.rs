//! Legacy chunked-upload accounting.
//!
//! Chunk identity is encoded in the uploaded filename:
//! `{name}-chunking-{transferid}-{totalchunks}-{index}`. The wire format
//! matches existing sync clients byte for byte.
//!
//! The cache is the only cross-request state the pipeline owns. Chunks are
//! stored idempotently by index; completion is a declared-count check; a
//! completed transfer can be claimed exactly once. Chunks that arrive
//! after assembly are dropped: the transfer id is tombstoned at claim time
//! and never revived, so a retried final chunk cannot re-open a session.

use crate::error::{DavError, DavResult};
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Decoded chunk filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkName {
    /// Final filename the transfer assembles into.
    pub base: String,
    pub transfer_id: String,
    /// Declared number of chunks in the transfer.
    pub total: usize,
    /// This chunk's position, zero-based.
    pub index: usize,
}

impl ChunkName {
    /// Decode `{name}-chunking-{transferid}-{totalchunks}-{index}`.
    ///
    /// Returns `None` when the name does not use the chunk encoding at
    /// all; malformed trailing fields also decode to `None` so the caller
    /// can reject the request as not implemented.
    pub fn decode(name: &str) -> Option<ChunkName> {
        let (base, rest) = name.rsplit_once("-chunking-")?;
        if base.is_empty() {
            return None;
        }
        let fields: Vec<&str> = rest.split('-').collect();
        if fields.len() != 3 {
            return None;
        }
        let transfer_id = fields[0];
        if transfer_id.is_empty() || !transfer_id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let total: usize = fields[1].parse().ok()?;
        let index: usize = fields[2].parse().ok()?;
        if total == 0 {
            return None;
        }
        Some(ChunkName {
            base: base.to_string(),
            transfer_id: transfer_id.to_string(),
            total,
            index,
        })
    }

    /// Encode back to the wire filename.
    pub fn encode(&self) -> String {
        format!(
            "{}-chunking-{}-{}-{}",
            self.base, self.transfer_id, self.total, self.index
        )
    }

    /// Key identifying the transfer this chunk belongs to.
    pub fn session_key(&self) -> String {
        format!("{}-chunking-{}", self.base, self.transfer_id)
    }
}

/// Resolve a possibly chunk-encoded filename to the final target name.
pub fn resolve_chunk_name(name: &str) -> &str {
    match name.rsplit_once("-chunking-") {
        Some((base, _)) if ChunkName::decode(name).is_some() && !base.is_empty() => base,
        _ => name,
    }
}

#[derive(Debug)]
struct Transfer {
    total: usize,
    chunks: BTreeMap<usize, Bytes>,
}

/// Outcome of storing one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStored {
    /// Accounted; `received` of `total` chunks now present.
    Pending { received: usize, total: usize },
    /// All declared chunks present; the caller should claim and assemble.
    Complete,
    /// The transfer already assembled; the chunk was dropped.
    Late,
}

/// Cross-request chunk store keyed by `{name}-chunking-{transferid}`.
#[derive(Debug, Default)]
pub struct ChunkCache {
    transfers: DashMap<String, Transfer>,
    tombstones: DashMap<String, ()>,
}

impl ChunkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one chunk's bytes.
    ///
    /// Storing the same index twice is idempotent: the bytes are replaced,
    /// the accounting does not change. An index at or past the declared
    /// total, or a total that disagrees with the transfer's declared
    /// total, is a client error.
    pub fn store(&self, name: &ChunkName, data: Bytes) -> DavResult<ChunkStored> {
        if name.index >= name.total {
            return Err(DavError::BadRequest(format!(
                "chunk index {} out of range for {} declared chunks",
                name.index, name.total
            )));
        }
        let key = name.session_key();
        if self.tombstones.contains_key(&key) {
            debug!(transfer = %key, index = name.index, "late chunk ignored");
            return Ok(ChunkStored::Late);
        }
        let mut transfer = self.transfers.entry(key.clone()).or_insert_with(|| Transfer {
            total: name.total,
            chunks: BTreeMap::new(),
        });
        if transfer.total != name.total {
            return Err(DavError::BadRequest(format!(
                "chunk declares {} total chunks, transfer was opened with {}",
                name.total, transfer.total
            )));
        }
        transfer.chunks.insert(name.index, data);
        let received = transfer.chunks.len();
        let total = transfer.total;
        trace!(transfer = %key, index = name.index, received, total, "chunk stored");
        if received >= total {
            Ok(ChunkStored::Complete)
        } else {
            Ok(ChunkStored::Pending { received, total })
        }
    }

    /// Remove one chunk (failed validation of that chunk's bytes).
    pub fn discard_chunk(&self, name: &ChunkName) {
        if let Some(mut transfer) = self.transfers.get_mut(&name.session_key()) {
            transfer.chunks.remove(&name.index);
        }
    }

    /// Claim a completed transfer's chunks, in index order.
    ///
    /// Succeeds at most once per transfer id: the entry is removed and
    /// tombstoned atomically, so two racing finalizers cannot both
    /// assemble.
    pub fn take_complete(&self, key: &str) -> Option<Vec<Bytes>> {
        let (_, transfer) = self
            .transfers
            .remove_if(key, |_, transfer| transfer.chunks.len() >= transfer.total)?;
        self.tombstones.insert(key.to_string(), ());
        debug!(transfer = %key, chunks = transfer.total, "transfer claimed for assembly");
        Some(transfer.chunks.into_values().collect())
    }

    /// Bytes accounted so far for a transfer.
    pub fn pending_bytes(&self, key: &str) -> u64 {
        self.transfers.get(key).map_or(0, |transfer| {
            transfer.chunks.values().map(|c| c.len() as u64).sum()
        })
    }

    /// Drop an in-flight transfer without assembling it.
    pub fn abort(&self, key: &str) {
        self.transfers.remove(key);
    }
}
