//! Rewind engine
//!
//! While playing, every produced frame is appended to a bounded
//! [`RewindBuffer`] and live input is logged. A rewind session freezes
//! recording; seeks restore the nearest stored state at or before the target
//! and replay logged input up to it. Ending the session makes the seek
//! position the new present: later history is discarded on the next append.

mod buffer;
mod record;

pub use buffer::{RewindBuffer, RewindStats};
pub use record::{RECORD_HEADER_BYTES, RecordKind, RewindRecord};

use tracing::{debug, info};

use crate::config::RewindConfig;
use crate::engine::{Events, StepEngine, Ticks};
use crate::error::RewindError;
use crate::input::{Buttons, InputLog, LiveInput, ReplayInput};
use crate::timer::IntervalTimer;

/// Whether a rewind session is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindState {
    /// Recording; input comes from the live source
    Idle,
    /// Browsing history; recording frozen, input replayed from the log
    Active,
}

/// Position within the recorded history during a rewind session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewindCursor {
    /// Tick the engine currently shows
    pub ticks: Ticks,
    /// Newest recorded tick when the session began
    pub began_at: Ticks,
}

/// Records history while playing and seeks within it while rewinding.
pub struct RewindEngine {
    buffer: RewindBuffer,
    input_log: InputLog,
    cursor: Option<RewindCursor>,
    auto_timer: IntervalTimer,
    factor: f64,
    ticks_per_second: u64,
}

impl RewindEngine {
    pub fn new(config: &RewindConfig, ticks_per_second: u64) -> Self {
        Self {
            buffer: RewindBuffer::new(config.buffer_capacity, config.frames_per_base_state),
            input_log: InputLog::new(),
            cursor: None,
            auto_timer: IntervalTimer::new(config.update_interval_ms as f64 / 1000.0),
            factor: config.factor,
            ticks_per_second,
        }
    }

    pub fn state(&self) -> RewindState {
        if self.cursor.is_some() {
            RewindState::Active
        } else {
            RewindState::Idle
        }
    }

    pub fn is_rewinding(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn cursor(&self) -> Option<RewindCursor> {
        self.cursor
    }

    /// Seekable range `(oldest, newest)`, if anything is recorded
    pub fn range(&self) -> Option<(Ticks, Ticks)> {
        Some((self.buffer.oldest_ticks()?, self.buffer.newest_ticks()?))
    }

    pub fn buffer(&self) -> &RewindBuffer {
        &self.buffer
    }

    pub fn input_log(&self) -> &InputLog {
        &self.input_log
    }

    pub fn stats(&self) -> RewindStats {
        self.buffer.stats()
    }

    /// Run the engine towards `target` with the input source for the current state.
    ///
    /// Live `buttons` are polled and logged while idle; during a rewind
    /// session the logged input is replayed instead.
    pub fn run_engine<E: StepEngine>(
        &mut self,
        engine: &mut E,
        target: Ticks,
        buttons: Buttons,
    ) -> Events {
        if self.cursor.is_some() {
            engine.run_until(target, &mut ReplayInput::new(&self.input_log))
        } else {
            engine.run_until(target, &mut LiveInput::new(&mut self.input_log, buttons))
        }
    }

    /// Record the engine's current state. Ignored during a rewind session.
    pub fn append<E: StepEngine>(&mut self, engine: &E) -> Result<(), RewindError> {
        if self.cursor.is_some() {
            return Ok(());
        }
        self.buffer.append(&engine.snapshot())?;
        if let Some(oldest) = self.buffer.oldest_ticks() {
            self.input_log.discard_before(oldest);
        }
        Ok(())
    }

    /// Open a rewind session, returning the cursor tick. No-op if already open.
    pub fn begin_rewind<E: StepEngine>(&mut self, engine: &E) -> Ticks {
        if let Some(cursor) = self.cursor {
            return cursor.ticks;
        }
        let ticks = self.buffer.newest_ticks().unwrap_or_else(|| engine.ticks());
        self.cursor = Some(RewindCursor {
            ticks,
            began_at: ticks,
        });
        info!("Rewind started at tick {}", ticks);
        ticks
    }

    /// Move the engine to `target`.
    ///
    /// Fails without touching the engine when no session is open or the
    /// target lies outside the recorded range.
    pub fn seek<E: StepEngine>(&mut self, engine: &mut E, target: Ticks) -> Result<(), RewindError> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Err(RewindError::NotRewinding);
        };

        let state = self.buffer.state_at(target)?;
        engine.restore(&state)?;
        if state.ticks() < target {
            let mut input = ReplayInput::new(&self.input_log);
            while !engine.run_until(target, &mut input).contains(Events::TARGET_REACHED) {}
        }

        debug!(
            "Rewound to tick {} (restored {}, replayed {})",
            target,
            state.ticks(),
            target - state.ticks()
        );
        cursor.ticks = target;
        Ok(())
    }

    /// [`seek`](Self::seek), reporting success as a flag
    pub fn rewind_to_ticks<E: StepEngine>(&mut self, engine: &mut E, target: Ticks) -> bool {
        match self.seek(engine, target) {
            Ok(()) => true,
            Err(err) => {
                debug!("Seek to tick {} refused: {}", target, err);
                false
            }
        }
    }

    /// Close the rewind session; the engine's tick becomes the new present.
    ///
    /// History recorded after that tick is discarded. Returns `false` if no
    /// session was open.
    pub fn end_rewind<E: StepEngine>(&mut self, engine: &E) -> bool {
        let Some(cursor) = self.cursor.take() else {
            return false;
        };
        self.auto_timer.cancel();
        self.buffer.truncate_from(engine.ticks().saturating_add(1));
        self.input_log.truncate_after(engine.ticks());
        info!(
            "Rewind ended at tick {} (began at {})",
            cursor.ticks, cursor.began_at
        );
        true
    }

    /// Drop all recorded history and logged input
    pub fn clear(&mut self) {
        self.auto_timer.cancel();
        self.cursor = None;
        self.buffer = RewindBuffer::new(self.buffer.capacity(), self.buffer.frames_per_base());
        self.input_log = InputLog::new();
    }

    /// Start continuous rewinding at `factor` times real time
    pub fn enter_auto_rewind(&mut self, now: f64) -> Result<(), RewindError> {
        if self.cursor.is_none() {
            return Err(RewindError::NotRewinding);
        }
        if !self.auto_timer.is_active() {
            self.auto_timer.start(now);
        }
        Ok(())
    }

    pub fn exit_auto_rewind(&mut self) {
        self.auto_timer.cancel();
    }

    pub fn is_auto_rewinding(&self) -> bool {
        self.auto_timer.is_active()
    }

    /// Poll the auto-rewind timer; returns `true` if the cursor moved.
    pub fn on_timer<E: StepEngine>(&mut self, engine: &mut E, now: f64) -> Result<bool, RewindError> {
        let fires = self.auto_timer.poll(now);
        if fires == 0 {
            return Ok(false);
        }
        let (Some(cursor), Some(oldest)) = (self.cursor, self.buffer.oldest_ticks()) else {
            return Ok(false);
        };

        let step = self.factor * self.auto_timer.period() * self.ticks_per_second as f64;
        let delta = (step * fires as f64) as Ticks;
        let target = cursor.ticks.saturating_sub(delta).max(oldest);
        if target >= cursor.ticks {
            return Ok(false);
        }
        self.seek(engine, target)?;
        Ok(true)
    }
}
