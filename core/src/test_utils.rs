//! Shared test utilities for integration and unit tests

use crate::audio::VirtualAudioSink;
use crate::config::SessionConfig;
use crate::presentation::SoftwareFramebuffer;
use crate::reference::ReferenceMachine;
use crate::session::Session;

/// Session over the reference machine with virtual sinks
pub type TestSession = Session<ReferenceMachine, VirtualAudioSink, SoftwareFramebuffer>;

/// Refresh period used by [`run_for`]
pub const REFRESH_SEC: f64 = 1.0 / 60.0;

/// Demo program session with the given config
pub fn session_with(config: &SessionConfig) -> TestSession {
    Session::create(
        &ReferenceMachine::demo_program(),
        None,
        config,
        VirtualAudioSink::new(),
        SoftwareFramebuffer::default(),
    )
    .expect("demo program loads")
}

/// Demo program session with default config
pub fn test_session() -> TestSession {
    session_with(&SessionConfig::default())
}

/// Drive refresh callbacks at 60 Hz from `from` for `seconds`, keeping the
/// audio clock in step. Returns the next callback time.
pub fn run_for(session: &mut TestSession, from: f64, seconds: f64) -> f64 {
    let mut now = from;
    let end = from + seconds;
    while now < end {
        session.audio_mut().sink_mut().set_now(now);
        session.on_animation_frame(now);
        now += REFRESH_SEC;
    }
    now
}
