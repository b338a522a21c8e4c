//! Frame clock: wall-clock callbacks to engine ticks
//!
//! Each display refresh advances the engine by the elapsed wall time
//! converted to ticks. The elapsed time is clamped so a stall (a suspended
//! window, a debugger break) skips ahead instead of catching up. The engine
//! stops at integral ticks; the fractional remainder is carried to the next
//! call so the tick count tracks the accumulated wall time without drift.

use tracing::{debug, trace};

use crate::audio::{AudioScheduler, AudioSink};
use crate::config::ClockConfig;
use crate::engine::{Events, StepEngine, Ticks};
use crate::input::Buttons;
use crate::presentation::PresentationSink;
use crate::rewind::RewindEngine;

/// Throughput estimate before the first measured interval
const INITIAL_FPS: f64 = 60.0;

/// Outcome of one [`FrameClock::step`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepReport {
    /// Clamped wall time consumed
    pub delta_sec: f64,
    /// Ticks the engine advanced
    pub ticks_advanced: Ticks,
    /// Frames produced
    pub frames: u32,
    /// Audio batches handed to the scheduler
    pub audio_batches: u32,
    /// Every event the engine reported
    pub events: Events,
}

/// Converts irregular refresh timestamps into engine ticks.
#[derive(Debug, Clone)]
pub struct FrameClock {
    ticks_per_second: f64,
    max_update_sec: f64,
    smoothing: f64,
    max_fps: f64,
    last_timestamp: Option<f64>,
    /// Ticks already run past the previous target
    leftover: f64,
    fps: f64,
}

impl FrameClock {
    /// Clock for an engine running at `ticks_per_second`
    pub fn new(config: &ClockConfig, ticks_per_second: u64) -> Self {
        Self {
            ticks_per_second: ticks_per_second as f64,
            max_update_sec: config.max_update_sec,
            smoothing: config.fps_smoothing,
            max_fps: config.max_fps,
            last_timestamp: None,
            leftover: 0.0,
            fps: INITIAL_FPS,
        }
    }

    /// Smoothed callback rate
    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn leftover(&self) -> f64 {
        self.leftover
    }

    /// Forget the previous timestamp and remainder; the next step advances nothing.
    pub fn reset(&mut self) {
        self.last_timestamp = None;
        self.leftover = 0.0;
    }

    /// Clamped wall time since the previous call, updating the throughput estimate
    pub fn advance(&mut self, now: f64) -> f64 {
        let delta = match self.last_timestamp {
            Some(last) => (now - last).max(0.0),
            None => 0.0,
        };
        self.last_timestamp = Some(now);

        if delta > 0.0 {
            let rate = (1.0 / delta).min(self.max_fps);
            self.fps = self.smoothing * self.fps + (1.0 - self.smoothing) * rate;
        }
        if delta > self.max_update_sec {
            debug!(
                "Frame interval {:.3}s clamped to {:.3}s",
                delta, self.max_update_sec
            );
        }
        delta.min(self.max_update_sec)
    }

    /// Next engine target for `delta_sec` of wall time, given the engine's tick.
    ///
    /// Returns the integral target and its exact fractional value.
    pub fn target(&self, current: Ticks, delta_sec: f64) -> (Ticks, f64) {
        let exact = current as f64 + delta_sec * self.ticks_per_second - self.leftover;
        (exact.ceil().max(current as f64) as Ticks, exact)
    }

    /// Run one refresh callback.
    ///
    /// Produced frames are uploaded to `presentation` and, unless a rewind
    /// session is open, recorded by `rewind`; completed audio batches go to
    /// `audio`. The latest frame is presented once at the end.
    pub fn step<E, A, P>(
        &mut self,
        now: f64,
        engine: &mut E,
        rewind: &mut RewindEngine,
        audio: &mut AudioScheduler<A>,
        presentation: &mut P,
        buttons: Buttons,
    ) -> StepReport
    where
        E: StepEngine,
        A: AudioSink,
        P: PresentationSink + ?Sized,
    {
        let delta_sec = self.advance(now);
        let start = engine.ticks();
        let (target, exact) = self.target(start, delta_sec);

        let mut report = StepReport {
            delta_sec,
            ..StepReport::default()
        };
        loop {
            let events = rewind.run_engine(engine, target, buttons);
            report.events |= events;

            if events.contains(Events::FRAME_READY) {
                report.frames += 1;
                presentation.upload(engine.frame_buffer());
                if !rewind.is_rewinding()
                    && let Err(err) = rewind.append(engine)
                {
                    debug!("Frame at tick {} not recorded: {}", engine.ticks(), err);
                }
            }
            if events.contains(Events::AUDIO_BUFFER_FULL) && !rewind.is_rewinding() {
                report.audio_batches += 1;
                audio.push(engine.audio_buffer());
            }
            if events.contains(Events::TARGET_REACHED) {
                break;
            }
        }

        let after = engine.ticks();
        self.leftover = after as f64 - exact;
        report.ticks_advanced = after - start;
        presentation.present();

        trace!(
            "Step: {:.4}s -> {} ticks, {} frames, leftover {:.3}",
            delta_sec, report.ticks_advanced, report.frames, self.leftover
        );
        report
    }
}
