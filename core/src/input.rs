//! Input recording and replay
//!
//! While playing, live button state is polled by the engine and every change
//! is appended to an [`InputLog`]. During a rewind seek the same log is
//! replayed so re-running the machine from a stored state reproduces the
//! original frames exactly.

use crate::engine::Ticks;

bitflags::bitflags! {
    /// Joypad button state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Buttons: u8 {
        const RIGHT = 0b0000_0001;
        const LEFT = 0b0000_0010;
        const UP = 0b0000_0100;
        const DOWN = 0b0000_1000;
        const A = 0b0001_0000;
        const B = 0b0010_0000;
        const SELECT = 0b0100_0000;
        const START = 0b1000_0000;
    }
}

/// Supplies button state to a running engine.
pub trait InputSource {
    /// Button state in effect at `ticks`
    fn poll(&mut self, ticks: Ticks) -> Buttons;
}

/// Constant input, mostly useful for tests and headless runs
impl InputSource for Buttons {
    fn poll(&mut self, _ticks: Ticks) -> Buttons {
        *self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InputEntry {
    ticks: Ticks,
    buttons: Buttons,
}

/// Tick-ordered log of button changes.
///
/// Only changes are stored; the state at any tick is the most recent entry at
/// or before it, or no buttons if there is none.
#[derive(Debug, Clone, Default)]
pub struct InputLog {
    entries: Vec<InputEntry>,
}

impl InputLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `buttons` as the state from `ticks` onwards
    pub fn record(&mut self, ticks: Ticks, buttons: Buttons) {
        // Anything logged past `ticks` belongs to a discarded future.
        self.truncate_after(ticks);

        if self.buttons_at(ticks) == buttons {
            return;
        }
        match self.entries.last_mut() {
            Some(last) if last.ticks == ticks => last.buttons = buttons,
            _ => self.entries.push(InputEntry { ticks, buttons }),
        }
    }

    /// Button state in effect at `ticks`
    pub fn buttons_at(&self, ticks: Ticks) -> Buttons {
        let idx = self.entries.partition_point(|e| e.ticks <= ticks);
        if idx == 0 {
            Buttons::empty()
        } else {
            self.entries[idx - 1].buttons
        }
    }

    /// Drop every change recorded after `ticks`
    pub fn truncate_after(&mut self, ticks: Ticks) {
        let idx = self.entries.partition_point(|e| e.ticks <= ticks);
        self.entries.truncate(idx);
    }

    /// Drop changes that can no longer be replayed, keeping the entry that
    /// defines the state at `ticks`
    pub fn discard_before(&mut self, ticks: Ticks) {
        let idx = self.entries.partition_point(|e| e.ticks <= ticks);
        if idx > 1 {
            self.entries.drain(..idx - 1);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Live input: returns the current buttons and logs every change.
pub struct LiveInput<'a> {
    log: &'a mut InputLog,
    buttons: Buttons,
}

impl<'a> LiveInput<'a> {
    pub fn new(log: &'a mut InputLog, buttons: Buttons) -> Self {
        Self { log, buttons }
    }
}

impl InputSource for LiveInput<'_> {
    fn poll(&mut self, ticks: Ticks) -> Buttons {
        self.log.record(ticks, self.buttons);
        self.buttons
    }
}

/// Replayed input: answers from a recorded log, never modifies it.
pub struct ReplayInput<'a> {
    log: &'a InputLog,
}

impl<'a> ReplayInput<'a> {
    pub fn new(log: &'a InputLog) -> Self {
        Self { log }
    }
}

impl InputSource for ReplayInput<'_> {
    fn poll(&mut self, ticks: Ticks) -> Buttons {
        self.log.buttons_at(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_log_reports_no_buttons() {
        let log = InputLog::new();
        assert_eq!(log.buttons_at(0), Buttons::empty());
        assert_eq!(log.buttons_at(u64::MAX), Buttons::empty());
    }

    #[test]
    fn record_only_stores_changes() {
        let mut log = InputLog::new();
        log.record(10, Buttons::empty());
        assert!(log.is_empty());

        log.record(20, Buttons::A);
        log.record(30, Buttons::A);
        log.record(40, Buttons::A | Buttons::LEFT);
        assert_eq!(log.len(), 2);

        assert_eq!(log.buttons_at(19), Buttons::empty());
        assert_eq!(log.buttons_at(20), Buttons::A);
        assert_eq!(log.buttons_at(39), Buttons::A);
        assert_eq!(log.buttons_at(1000), Buttons::A | Buttons::LEFT);
    }

    #[test]
    fn record_same_tick_overwrites() {
        let mut log = InputLog::new();
        log.record(5, Buttons::B);
        log.record(5, Buttons::START);
        assert_eq!(log.len(), 1);
        assert_eq!(log.buttons_at(5), Buttons::START);
    }

    #[test]
    fn record_in_the_past_discards_future() {
        let mut log = InputLog::new();
        log.record(10, Buttons::A);
        log.record(50, Buttons::B);
        log.record(30, Buttons::UP);
        assert_eq!(log.buttons_at(60), Buttons::UP);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn truncate_after_keeps_earlier_entries() {
        let mut log = InputLog::new();
        log.record(10, Buttons::A);
        log.record(20, Buttons::B);
        log.truncate_after(15);
        assert_eq!(log.len(), 1);
        assert_eq!(log.buttons_at(100), Buttons::A);
    }

    #[test]
    fn discard_before_keeps_defining_entry() {
        let mut log = InputLog::new();
        log.record(10, Buttons::A);
        log.record(20, Buttons::B);
        log.record(30, Buttons::UP);
        log.discard_before(25);
        assert_eq!(log.len(), 2);
        assert_eq!(log.buttons_at(25), Buttons::B);
        assert_eq!(log.buttons_at(35), Buttons::UP);
    }

    #[test]
    fn live_input_records_and_replay_reads() {
        let mut log = InputLog::new();
        {
            let mut live = LiveInput::new(&mut log, Buttons::DOWN);
            assert_eq!(live.poll(100), Buttons::DOWN);
            assert_eq!(live.poll(200), Buttons::DOWN);
        }
        let mut replay = ReplayInput::new(&log);
        assert_eq!(replay.poll(50), Buttons::empty());
        assert_eq!(replay.poll(150), Buttons::DOWN);
        assert_eq!(log.len(), 1);
    }
}
