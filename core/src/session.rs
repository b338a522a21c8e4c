//! Playback session
//!
//! A [`Session`] owns one engine together with the rewind history, the
//! audio scheduler, the frame clock and the sinks they feed. The host calls
//! [`Session::on_animation_frame`] from its refresh callback and
//! [`Session::on_rewind_timer`] from a fast periodic timer; everything else
//! is a user command.
//!
//! ```text
//!             pause / enter_auto_rewind
//!   Running ─────────────────────────────▶ Paused ◀──▶ Rewinding
//!      ▲                                     │             │
//!      └──────────────── resume ─────────────┴─────────────┘
//! ```

use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use crate::audio::{AudioScheduler, AudioSink};
use crate::clock::{FrameClock, StepReport};
use crate::config::SessionConfig;
use crate::engine::{StepEngine, Ticks};
use crate::error::{EngineError, RewindError, SessionError};
use crate::input::Buttons;
use crate::presentation::PresentationSink;
use crate::rewind::{RewindEngine, RewindStats};

/// Playback state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Engine advancing with the refresh callback
    Running,
    /// Stepping halted; history can be browsed
    Paused,
    /// Paused with continuous auto-rewind active
    Rewinding,
}

/// A session shared with callbacks on other threads
pub type SharedSession<E, A, P> = Arc<Mutex<Session<E, A, P>>>;

/// One loaded program and everything that drives it.
pub struct Session<E: StepEngine, A: AudioSink, P: PresentationSink> {
    state: PlaybackState,
    /// A refresh callback is wanted
    frame_pending: bool,
    buttons: Buttons,
    persistent_updated: bool,

    clock: FrameClock,
    audio: AudioScheduler<A>,
    presentation: P,
    rewind: RewindEngine,
    engine: E,
}

impl<E: StepEngine, A: AudioSink, P: PresentationSink> Session<E, A, P> {
    /// Load `program` and start running.
    ///
    /// `persistent_ram` is loaded only if its size matches what the program
    /// declares; otherwise the program starts with blank persistent RAM.
    pub fn create(
        program: &[u8],
        persistent_ram: Option<&[u8]>,
        config: &SessionConfig,
        audio_sink: A,
        presentation: P,
    ) -> Result<Self, SessionError> {
        config
            .validate()
            .map_err(|e| SessionError::InvalidConfig(e.to_string()))?;

        let mut engine = E::create(program, config.audio.sample_rate, config.audio.frames)
            .map_err(|e| match e {
                EngineError::InvalidProgram(reason) => SessionError::InvalidProgram(reason),
                other => SessionError::Engine(other),
            })?;

        if let Some(data) = persistent_ram {
            match engine.read_persistent_ram(data) {
                Ok(()) => info!("Loaded {} bytes of persistent RAM", data.len()),
                Err(err) => warn!("Ignoring stored persistent RAM: {}", err),
            }
        }

        let ticks_per_second = engine.ticks_per_second();
        if ticks_per_second == 0 {
            return Err(SessionError::InvalidProgram("engine reports no tick rate".into()));
        }

        info!(
            "Session created ({} byte program, {} bytes persistent RAM, {} ticks/s)",
            program.len(),
            engine.persistent_ram_size(),
            ticks_per_second
        );

        Ok(Self {
            state: PlaybackState::Running,
            frame_pending: true,
            buttons: Buttons::empty(),
            persistent_updated: false,
            clock: FrameClock::new(&config.clock, ticks_per_second),
            audio: AudioScheduler::new(audio_sink, &config.audio),
            presentation,
            rewind: RewindEngine::new(&config.rewind, ticks_per_second),
            engine,
        })
    }

    /// Refresh callback. Steps the engine if a frame was requested and the
    /// session is running.
    pub fn on_animation_frame(&mut self, now: f64) -> Option<StepReport> {
        if !self.frame_pending {
            return None;
        }
        if self.state != PlaybackState::Running {
            self.frame_pending = false;
            return None;
        }

        let report = self.clock.step(
            now,
            &mut self.engine,
            &mut self.rewind,
            &mut self.audio,
            &mut self.presentation,
            self.buttons,
        );
        if self.engine.take_persistent_ram_updated() {
            self.persistent_updated = true;
        }
        Some(report)
    }

    /// Halt stepping and open the rewind history. No-op unless running.
    pub fn pause(&mut self) {
        if self.state != PlaybackState::Running {
            return;
        }
        self.frame_pending = false;
        self.audio.suspend();
        let ticks = self.rewind.begin_rewind(&self.engine);
        self.state = PlaybackState::Paused;
        info!("Paused at tick {}", ticks);
    }

    /// Continue from the current rewind position. No-op while running.
    pub fn resume(&mut self) {
        if self.state == PlaybackState::Running {
            return;
        }
        self.rewind.end_rewind(&self.engine);
        self.clock.reset();
        self.audio.reset();
        self.audio.resume();
        self.frame_pending = true;
        self.state = PlaybackState::Running;
        info!("Resumed at tick {}", self.engine.ticks());
    }

    pub fn toggle_pause(&mut self) {
        match self.state {
            PlaybackState::Running => self.pause(),
            PlaybackState::Paused | PlaybackState::Rewinding => self.resume(),
        }
    }

    /// Show the state at `target`. Only valid while paused or rewinding.
    pub fn rewind_to_ticks(&mut self, target: Ticks) -> bool {
        match self.rewind.seek(&mut self.engine, target) {
            Ok(()) => {
                self.show_frame();
                true
            }
            Err(RewindError::Engine(err)) => {
                error!("Engine failed to restore tick {}: {}", target, err);
                false
            }
            Err(err) => {
                debug!("Seek to tick {} refused: {}", target, err);
                false
            }
        }
    }

    /// Seekable range `(oldest, newest)`
    pub fn rewind_range(&self) -> Option<(Ticks, Ticks)> {
        self.rewind.range()
    }

    /// Rewind continuously, pausing first if running.
    pub fn enter_auto_rewind(&mut self, now: f64) {
        if self.state == PlaybackState::Running {
            self.pause();
        }
        if self.rewind.enter_auto_rewind(now).is_ok() {
            self.state = PlaybackState::Rewinding;
        }
    }

    /// Stop continuous rewinding, staying paused at the current position.
    pub fn exit_auto_rewind(&mut self) {
        if self.state == PlaybackState::Rewinding {
            self.rewind.exit_auto_rewind();
            self.state = PlaybackState::Paused;
        }
    }

    /// Auto-rewind timer callback; returns `true` if the shown tick moved.
    pub fn on_rewind_timer(&mut self, now: f64) -> Result<bool, SessionError> {
        if self.state != PlaybackState::Rewinding {
            return Ok(false);
        }
        match self.rewind.on_timer(&mut self.engine, now) {
            Ok(true) => {
                self.show_frame();
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(RewindError::Engine(err)) => Err(err.into()),
            Err(err) => {
                debug!("Auto-rewind step skipped: {}", err);
                Ok(false)
            }
        }
    }

    fn show_frame(&mut self) {
        self.presentation.upload(self.engine.frame_buffer());
        self.presentation.present();
    }

    /// Live button state used while running
    pub fn set_buttons(&mut self, buttons: Buttons) {
        self.buttons = buttons;
    }

    pub fn buttons(&self) -> Buttons {
        self.buttons
    }

    /// Current tick; the rewind position while paused
    pub fn ticks(&self) -> Ticks {
        match self.rewind.cursor() {
            Some(cursor) => cursor.ticks,
            None => self.engine.ticks(),
        }
    }

    /// Engine time base
    pub fn ticks_per_second(&self) -> u64 {
        self.engine.ticks_per_second()
    }

    /// Smoothed refresh rate
    pub fn fps(&self) -> f64 {
        self.clock.fps()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_frame_pending(&self) -> bool {
        self.frame_pending
    }

    /// Whether persistent RAM changed since the last call
    pub fn take_persistent_ram_updated(&mut self) -> bool {
        let engine = self.engine.take_persistent_ram_updated();
        std::mem::take(&mut self.persistent_updated) || engine
    }

    pub fn persistent_ram(&self) -> Vec<u8> {
        self.engine.write_persistent_ram()
    }

    pub fn rewind_stats(&self) -> RewindStats {
        self.rewind.stats()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn audio(&self) -> &AudioScheduler<A> {
        &self.audio
    }

    pub fn audio_mut(&mut self) -> &mut AudioScheduler<A> {
        &mut self.audio
    }

    pub fn presentation(&self) -> &P {
        &self.presentation
    }

    /// Tear the session down, returning the final persistent RAM.
    pub fn shutdown(mut self) -> Vec<u8> {
        let ram = self.engine.write_persistent_ram();
        self.teardown();
        ram
    }

    fn teardown(&mut self) {
        self.frame_pending = false;
        self.rewind.exit_auto_rewind();
        self.rewind.end_rewind(&self.engine);
        self.rewind.clear();
        debug!("Session torn down at tick {}", self.engine.ticks());
    }
}

impl<E: StepEngine, A: AudioSink, P: PresentationSink> Drop for Session<E, A, P> {
    fn drop(&mut self) {
        // Fields drop after this, engine last.
        self.teardown();
    }
}
