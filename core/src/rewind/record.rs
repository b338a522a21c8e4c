//! Rewind records
//!
//! A base record stores a full engine snapshot, LZ4 compressed. An
//! incremental record stores the XOR of a later snapshot against its group's
//! base state, also LZ4 compressed: frames that touch little state XOR to
//! long zero runs and compress to a few hundred bytes.

use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use crate::engine::{Snapshot, Ticks};
use crate::error::RewindError;

/// Bookkeeping bytes charged per record on top of its payload
pub const RECORD_HEADER_BYTES: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Full snapshot
    Base,
    /// Delta against the group's base snapshot
    Incremental,
}

/// One stored point in the rewind history.
#[derive(Debug, Clone)]
pub struct RewindRecord {
    ticks: Ticks,
    kind: RecordKind,
    payload: Vec<u8>,
    /// Checksum of the full snapshot this record reconstructs
    checksum: u64,
}

impl RewindRecord {
    /// Compress a full snapshot
    pub fn base(snapshot: &Snapshot) -> Self {
        Self {
            ticks: snapshot.ticks(),
            kind: RecordKind::Base,
            payload: compress_prepend_size(snapshot.data()),
            checksum: snapshot.checksum(),
        }
    }

    /// Encode `snapshot` relative to `base_state`.
    ///
    /// Returns `None` when the sizes differ and a delta cannot be formed.
    pub fn incremental(snapshot: &Snapshot, base_state: &[u8]) -> Option<Self> {
        if snapshot.len() != base_state.len() {
            return None;
        }
        let delta: Vec<u8> = snapshot
            .data()
            .iter()
            .zip(base_state)
            .map(|(a, b)| a ^ b)
            .collect();
        Some(Self {
            ticks: snapshot.ticks(),
            kind: RecordKind::Incremental,
            payload: compress_prepend_size(&delta),
            checksum: snapshot.checksum(),
        })
    }

    pub fn ticks(&self) -> Ticks {
        self.ticks
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Bytes this record counts against the buffer capacity
    pub fn stored_size(&self) -> usize {
        self.payload.len() + RECORD_HEADER_BYTES
    }

    /// Decompress a base record's state
    pub fn decode_base(&self) -> Result<Vec<u8>, RewindError> {
        debug_assert_eq!(self.kind, RecordKind::Base);
        decompress_size_prepended(&self.payload).map_err(|e| RewindError::Decode(e.to_string()))
    }

    /// Rebuild the full snapshot, given the decoded state of the group's base
    pub fn reconstruct(&self, base_state: &[u8]) -> Result<Snapshot, RewindError> {
        let data = match self.kind {
            RecordKind::Base => base_state.to_vec(),
            RecordKind::Incremental => {
                let delta = decompress_size_prepended(&self.payload)
                    .map_err(|e| RewindError::Decode(e.to_string()))?;
                if delta.len() != base_state.len() {
                    return Err(RewindError::Decode(format!(
                        "delta is {} bytes, base is {}",
                        delta.len(),
                        base_state.len()
                    )));
                }
                delta.iter().zip(base_state).map(|(d, b)| d ^ b).collect()
            }
        };

        let snapshot = Snapshot::new(data, self.ticks);
        if snapshot.checksum() != self.checksum {
            return Err(RewindError::Decode(format!(
                "checksum mismatch at tick {}",
                self.ticks
            )));
        }
        Ok(snapshot)
    }
}
