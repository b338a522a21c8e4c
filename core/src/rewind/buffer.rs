//! Bounded rewind history
//!
//! Records are grouped: each group is one base record followed by the
//! incremental records that depend on it. Groups live in a ring
//! (`VecDeque`) ordered by tick. When a new record would push the stored
//! size over capacity, whole groups are evicted from the front, so an
//! incremental record never outlives its base.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::engine::{Snapshot, Ticks};
use crate::error::RewindError;

use super::record::{RecordKind, RewindRecord};

/// A base record and its dependent incremental records.
#[derive(Debug, Clone)]
struct RewindGroup {
    records: Vec<RewindRecord>,
    size: usize,
}

impl RewindGroup {
    fn new(base: RewindRecord) -> Self {
        let size = base.stored_size();
        Self {
            records: vec![base],
            size,
        }
    }

    fn base_ticks(&self) -> Ticks {
        self.records[0].ticks()
    }

    fn newest_ticks(&self) -> Ticks {
        self.records[self.records.len() - 1].ticks()
    }

    fn push(&mut self, record: RewindRecord) {
        self.size += record.stored_size();
        self.records.push(record);
    }
}

/// Point-in-time figures for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RewindStats {
    pub records: usize,
    pub groups: usize,
    pub size: usize,
    pub capacity: usize,
    pub oldest_ticks: Option<Ticks>,
    pub newest_ticks: Option<Ticks>,
    pub evicted_groups: u64,
    pub dropped_records: u64,
}

/// Capacity-bounded, tick-ordered log of rewind records.
pub struct RewindBuffer {
    groups: VecDeque<RewindGroup>,
    capacity: usize,
    size: usize,
    frames_per_base: u32,
    /// Records in the newest group
    frames_since_base: u32,
    /// Decoded state of the newest group's base; `None` forces the next record to be a base
    working_base: Option<Vec<u8>>,
    evicted_groups: u64,
    dropped_records: u64,
}

impl RewindBuffer {
    pub fn new(capacity: usize, frames_per_base: u32) -> Self {
        Self {
            groups: VecDeque::new(),
            capacity,
            size: 0,
            frames_per_base: frames_per_base.max(1),
            frames_since_base: 0,
            working_base: None,
            evicted_groups: 0,
            dropped_records: 0,
        }
    }

    /// Store the state of one produced frame.
    ///
    /// A snapshot at or before the newest stored tick first discards the
    /// history from that tick on; it belongs to a future that was abandoned
    /// by rewinding.
    pub fn append(&mut self, snapshot: &Snapshot) -> Result<(), RewindError> {
        if self.newest_ticks().is_some_and(|newest| snapshot.ticks() <= newest) {
            self.truncate_from(snapshot.ticks());
        }

        let mut record = self.encode(snapshot);
        loop {
            let size = record.stored_size();
            if record.kind() == RecordKind::Base && size > self.capacity {
                self.dropped_records += 1;
                self.working_base = None;
                warn!(
                    "Rewind record at tick {} ({} bytes) exceeds capacity {}",
                    snapshot.ticks(),
                    size,
                    self.capacity
                );
                return Err(RewindError::RecordTooLarge {
                    size,
                    capacity: self.capacity,
                });
            }
            if self.size + size <= self.capacity {
                break;
            }

            let evictable = match record.kind() {
                RecordKind::Base => !self.groups.is_empty(),
                RecordKind::Incremental => self.groups.len() > 1,
            };
            self.evict_oldest();
            if !evictable {
                // The delta's own base is gone; store this frame as a new base.
                record = RewindRecord::base(snapshot);
            }
        }

        match record.kind() {
            RecordKind::Base => {
                self.working_base = Some(snapshot.data().to_vec());
                self.frames_since_base = 1;
                self.size += record.stored_size();
                self.groups.push_back(RewindGroup::new(record));
            }
            RecordKind::Incremental => {
                self.frames_since_base += 1;
                self.size += record.stored_size();
                if let Some(group) = self.groups.back_mut() {
                    group.push(record);
                }
            }
        }
        Ok(())
    }

    fn encode(&self, snapshot: &Snapshot) -> RewindRecord {
        match &self.working_base {
            Some(base) if self.frames_since_base < self.frames_per_base && !self.groups.is_empty() => {
                RewindRecord::incremental(snapshot, base)
                    .unwrap_or_else(|| RewindRecord::base(snapshot))
            }
            _ => RewindRecord::base(snapshot),
        }
    }

    fn evict_oldest(&mut self) {
        if let Some(group) = self.groups.pop_front() {
            self.size -= group.size;
            self.evicted_groups += 1;
            debug!(
                "Evicted rewind group at tick {} ({} records, {} bytes)",
                group.base_ticks(),
                group.records.len(),
                group.size
            );
        }
        if self.groups.is_empty() {
            self.working_base = None;
            self.frames_since_base = 0;
        }
    }

    /// Drop every record at or after `ticks`
    pub(crate) fn truncate_from(&mut self, ticks: Ticks) {
        let before = self.size;
        while let Some(group) = self.groups.back_mut() {
            if group.base_ticks() >= ticks {
                self.size -= group.size;
                self.groups.pop_back();
                continue;
            }
            let keep = group.records.partition_point(|r| r.ticks() < ticks);
            let removed: usize = group.records[keep..].iter().map(|r| r.stored_size()).sum();
            group.records.truncate(keep);
            group.size -= removed;
            self.size -= removed;
            break;
        }
        if self.size != before || self.groups.is_empty() {
            // Resume with a fresh base rather than decoding the old one.
            self.working_base = None;
            self.frames_since_base = 0;
        }
    }

    /// Tick of the oldest base record
    pub fn oldest_ticks(&self) -> Option<Ticks> {
        self.groups.front().map(RewindGroup::base_ticks)
    }

    /// Tick of the newest record
    pub fn newest_ticks(&self) -> Option<Ticks> {
        self.groups.back().map(RewindGroup::newest_ticks)
    }

    /// Reconstruct the newest stored state at or before `target`
    pub fn state_at(&self, target: Ticks) -> Result<Snapshot, RewindError> {
        let (Some(oldest), Some(newest)) = (self.oldest_ticks(), self.newest_ticks()) else {
            return Err(RewindError::Empty);
        };
        if target < oldest || target > newest {
            return Err(RewindError::OutOfRange {
                target,
                oldest,
                newest,
            });
        }

        let group_idx = self.groups.partition_point(|g| g.base_ticks() <= target) - 1;
        let group = &self.groups[group_idx];
        let record_idx = group.records.partition_point(|r| r.ticks() <= target) - 1;

        let base_state = group.records[0].decode_base()?;
        group.records[record_idx].reconstruct(&base_state)
    }

    /// Bytes currently stored
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn frames_per_base(&self) -> u32 {
        self.frames_per_base
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Ticks of every stored base record, oldest first
    pub fn base_ticks(&self) -> Vec<Ticks> {
        self.groups.iter().map(RewindGroup::base_ticks).collect()
    }

    pub fn stats(&self) -> RewindStats {
        RewindStats {
            records: self.len(),
            groups: self.groups.len(),
            size: self.size,
            capacity: self.capacity,
            oldest_ticks: self.oldest_ticks(),
            newest_ticks: self.newest_ticks(),
            evicted_groups: self.evicted_groups,
            dropped_records: self.dropped_records,
        }
    }
}
