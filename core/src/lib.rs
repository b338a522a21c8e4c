//! Rewinder Core - play / pause / rewind orchestration
//!
//! This crate drives a cycle-stepped machine from irregular display refresh
//! callbacks while keeping audio, video and a bounded rewind history in step.
//!
//! # Architecture
//!
//! - [`StepEngine`] - Opaque stepping machine (snapshot, restore, run to a tick)
//! - [`FrameClock`] - Wall-clock intervals to engine ticks, routes engine events
//! - [`AudioScheduler`] - Gapless, latency-buffered scheduling with drift reset
//! - [`RewindEngine`] - Bounded history, seeking and continuous auto-rewind
//! - [`Session`] - Owns all of the above and the play / pause state machine

pub mod audio;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod input;
#[cfg(test)]
mod integration;
pub mod presentation;
pub mod reference;
pub mod rewind;
pub mod session;
pub mod store;
#[cfg(test)]
pub mod test_utils;
pub mod timer;

pub use audio::{AudioBatch, AudioScheduler, AudioSink, VirtualAudioSink};
pub use clock::{FrameClock, StepReport};
pub use config::SessionConfig;
pub use engine::{Events, Snapshot, StepEngine, Ticks};
pub use error::{ConfigError, EngineError, RewindError, SessionError, StoreError};
pub use input::{Buttons, InputLog, InputSource};
pub use presentation::{PresentationSink, SoftwareFramebuffer};
pub use reference::ReferenceMachine;
pub use rewind::{RewindEngine, RewindState, RewindStats};
pub use session::{PlaybackState, Session, SharedSession};
pub use store::{
    BlobMetadata, BlobRecord, BlobStore, FileBlobStore, MemoryBlobStore, PersistentRamSync,
    ProgramKey,
};
pub use timer::{IntervalTimer, ManualClock, SystemClock, TimeSource};
