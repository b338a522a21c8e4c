//! Periodic persistent RAM flushing
//!
//! Each write also stores a thumbnail of the last completed frame, so a
//! save can be recognised at a glance.

use tracing::{debug, info, warn};

use super::{BlobRecord, BlobStore, ProgramKey};
use crate::audio::AudioSink;
use crate::engine::StepEngine;
use crate::error::StoreError;
use crate::presentation::{self, PresentationSink};
use crate::session::Session;
use crate::timer::IntervalTimer;

/// Writes a session's persistent RAM to a blob store at most once per period.
pub struct PersistentRamSync {
    key: String,
    name: String,
    timer: IntervalTimer,
    flushes: u64,
}

impl PersistentRamSync {
    /// `name` is stored as record metadata, typically the program's file name
    pub fn new(program: &[u8], name: impl Into<String>, flush_interval_ms: u64) -> Self {
        Self {
            key: ProgramKey::of(program).persistent_ram(),
            name: name.into(),
            timer: IntervalTimer::new(flush_interval_ms as f64 / 1000.0),
            flushes: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Completed flushes
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Stored persistent RAM for this program, if any
    pub fn load<S: BlobStore>(&self, store: &S) -> Result<Option<Vec<u8>>, StoreError> {
        let record = store.get(&self.key)?;
        if let Some(record) = &record {
            info!(
                "Found persistent RAM for {} ({} bytes, saved {})",
                record.metadata.name,
                record.bytes.len(),
                record.metadata.modified
            );
        }
        Ok(record.map(|r| r.bytes))
    }

    /// Flush if a period elapsed and the session reports a change.
    ///
    /// Returns whether a write happened.
    pub fn poll<E, A, P, S>(
        &mut self,
        now: f64,
        session: &mut Session<E, A, P>,
        store: &mut S,
    ) -> Result<bool, StoreError>
    where
        E: StepEngine,
        A: AudioSink,
        P: PresentationSink,
        S: BlobStore,
    {
        if !self.timer.is_active() {
            self.timer.start(now);
            return Ok(false);
        }
        if self.timer.poll(now) == 0 || !session.take_persistent_ram_updated() {
            return Ok(false);
        }
        self.flush(
            &session.persistent_ram(),
            Some(session.engine().frame_buffer()),
            store,
        )?;
        Ok(true)
    }

    /// Write `ram` now, with a thumbnail of `frame` if given
    pub fn flush<S: BlobStore>(
        &mut self,
        ram: &[u8],
        frame: Option<&[u8]>,
        store: &mut S,
    ) -> Result<(), StoreError> {
        if ram.is_empty() {
            debug!("No persistent RAM to store");
            return Ok(());
        }
        let mut record = BlobRecord::new(ram.to_vec(), self.name.clone());
        if let Some(png) = frame.and_then(presentation::thumbnail_png) {
            record = record.with_thumbnail(png);
        }
        match store.put(&self.key, &record) {
            Ok(()) => {
                self.flushes += 1;
                debug!("Flushed {} bytes of persistent RAM", ram.len());
                Ok(())
            }
            Err(err) => {
                warn!("Failed to store persistent RAM: {}", err);
                Err(err)
            }
        }
    }
}
