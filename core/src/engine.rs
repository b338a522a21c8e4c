//! Step engine boundary
//!
//! The simulated machine is opaque to the orchestration core. Everything the
//! core needs from it is expressed by the [`StepEngine`] trait: advance to a
//! tick, report events, snapshot/restore full state, and exchange persistent
//! RAM. Buffers crossing this boundary are owned, length-checked slices.

use xxhash_rust::xxh3::xxh3_64;

use crate::error::EngineError;
use crate::input::InputSource;

/// Simulation time in machine cycles.
pub type Ticks = u64;

bitflags::bitflags! {
    /// Events reported by a single [`StepEngine::run_until`] call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Events: u8 {
        /// A complete frame is available in [`StepEngine::frame_buffer`]
        const FRAME_READY = 0b0000_0001;
        /// The audio batch in [`StepEngine::audio_buffer`] is full
        const AUDIO_BUFFER_FULL = 0b0000_0010;
        /// The requested target tick was reached
        const TARGET_REACHED = 0b0000_0100;
    }
}

/// Immutable serialized copy of the complete simulation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    data: Vec<u8>,
    ticks: Ticks,
    checksum: u64,
}

impl Snapshot {
    /// Wrap serialized engine state taken at `ticks`.
    pub fn new(data: Vec<u8>, ticks: Ticks) -> Self {
        let checksum = xxh3_64(&data);
        Self {
            data,
            ticks,
            checksum,
        }
    }

    /// Tick at which the snapshot was taken
    pub fn ticks(&self) -> Ticks {
        self.ticks
    }

    /// Serialized state bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the snapshot, returning the serialized bytes
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// xxh3 checksum of the serialized state
    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A cycle-stepped machine driven by the orchestration core.
///
/// Implementations are not reentrant; the session guarantees a single caller.
/// Dropping the engine releases it.
pub trait StepEngine: Sized {
    /// Load a program. Fails with [`EngineError::InvalidProgram`] before any
    /// other resource is allocated.
    fn create(program: &[u8], sample_rate: u32, audio_frames: usize) -> Result<Self, EngineError>;

    /// Run until an event occurs or `target` is reached.
    ///
    /// After the call `ticks() <= max(target, ticks_before)`. The returned set
    /// contains [`Events::TARGET_REACHED`] once no further ticks are needed.
    fn run_until(&mut self, target: Ticks, input: &mut dyn InputSource) -> Events;

    /// Current tick
    fn ticks(&self) -> Ticks;

    /// Fixed rate at which ticks advance in simulated time
    fn ticks_per_second(&self) -> u64;

    /// Serialize complete state
    fn snapshot(&self) -> Snapshot;

    /// Restore state previously produced by [`StepEngine::snapshot`]
    fn restore(&mut self, snapshot: &Snapshot) -> Result<(), EngineError>;

    /// RGBA pixels of the most recently completed frame
    fn frame_buffer(&self) -> &[u8];

    /// Interleaved unsigned 8-bit stereo samples of the last full audio batch
    fn audio_buffer(&self) -> &[u8];

    /// Load persistent (battery-backed) RAM
    fn read_persistent_ram(&mut self, data: &[u8]) -> Result<(), EngineError>;

    /// Copy out persistent RAM
    fn write_persistent_ram(&self) -> Vec<u8>;

    /// Size of persistent RAM in bytes (0 if the program has none)
    fn persistent_ram_size(&self) -> usize;

    /// Returns true once per persistent RAM modification, then clears the flag
    fn take_persistent_ram_updated(&mut self) -> bool;
}
