//! Time sources and polled timers
//!
//! The session never registers OS callbacks. Hosts pass timestamps (from a
//! [`TimeSource`]) into the refresh and timer entry points, which lets tests
//! and the headless runner drive everything with synthetic time.

use std::time::Instant;

/// Most periods an [`IntervalTimer`] reports from a single poll
const MAX_CATCH_UP: u32 = 4;

/// Monotonic time in seconds.
pub trait TimeSource {
    fn now_sec(&self) -> f64;
}

/// Wall-clock time since construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn now_sec(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Manually advanced clock for tests and headless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualClock {
    now: f64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self { now: start }
    }

    pub fn advance(&mut self, dt: f64) {
        self.now += dt.max(0.0);
    }

    pub fn set(&mut self, now: f64) {
        self.now = now;
    }
}

impl TimeSource for ManualClock {
    fn now_sec(&self) -> f64 {
        self.now
    }
}

/// Fixed-period timer polled with timestamps.
///
/// A late poll reports every period that elapsed, up to a small cap; beyond
/// that the timer re-anchors to the poll time instead of bursting.
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    period: f64,
    next_due: Option<f64>,
}

impl IntervalTimer {
    pub fn new(period_sec: f64) -> Self {
        Self {
            period: period_sec,
            next_due: None,
        }
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    /// Arm the timer; the first fire is one period after `now`
    pub fn start(&mut self, now: f64) {
        self.next_due = Some(now + self.period);
    }

    /// Disarm the timer
    pub fn cancel(&mut self) {
        self.next_due = None;
    }

    pub fn is_active(&self) -> bool {
        self.next_due.is_some()
    }

    /// Number of periods that elapsed by `now`
    pub fn poll(&mut self, now: f64) -> u32 {
        let Some(mut due) = self.next_due else {
            return 0;
        };

        let mut fires = 0;
        while due <= now && fires < MAX_CATCH_UP {
            fires += 1;
            due += self.period;
        }
        if due <= now {
            due = now + self.period;
        }
        self.next_due = Some(due);
        fires
    }
}
