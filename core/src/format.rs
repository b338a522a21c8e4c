//! Human-readable rendering of ticks, sizes and session statistics
//!
//! Used by scrubber labels and the headless runner's report.

use serde::Serialize;

use crate::engine::Ticks;
use crate::rewind::RewindStats;

/// Render `ticks` as `h:mm:ss.mmm` at `ticks_per_second`.
pub fn format_ticks(ticks: Ticks, ticks_per_second: u64) -> String {
    let tps = ticks_per_second.max(1) as u128;
    let millis = (ticks as u128 * 1000 / tps) as u64;
    let (secs, ms) = (millis / 1000, millis % 1000);
    let (mins, s) = (secs / 60, secs % 60);
    let (h, m) = (mins / 60, mins % 60);
    format!("{}:{:02}:{:02}.{:03}", h, m, s, ms)
}

/// Render a byte count as B/KB/MB.
pub fn format_bytes(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

/// A single labelled statistic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStat {
    /// Display name for the stat
    pub name: String,
    /// Current value as a formatted string
    pub value: String,
}

impl SessionStat {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn number(name: impl Into<String>, value: impl std::fmt::Display) -> Self {
        Self::new(name, value.to_string())
    }

    pub fn bytes(name: impl Into<String>, bytes: usize) -> Self {
        Self::new(name, format_bytes(bytes))
    }

    pub fn ticks(name: impl Into<String>, ticks: Ticks, ticks_per_second: u64) -> Self {
        Self::new(name, format_ticks(ticks, ticks_per_second))
    }
}

/// Statistics describing the rewind history
pub fn rewind_stats(stats: &RewindStats, ticks_per_second: u64) -> Vec<SessionStat> {
    let mut out = vec![
        SessionStat::number("Records", stats.records),
        SessionStat::number("Base groups", stats.groups),
        SessionStat::new(
            "Buffer",
            format!(
                "{} / {}",
                format_bytes(stats.size),
                format_bytes(stats.capacity)
            ),
        ),
    ];
    if let (Some(oldest), Some(newest)) = (stats.oldest_ticks, stats.newest_ticks) {
        out.push(SessionStat::ticks("Oldest", oldest, ticks_per_second));
        out.push(SessionStat::ticks("Newest", newest, ticks_per_second));
        out.push(SessionStat::ticks(
            "Span",
            newest - oldest,
            ticks_per_second,
        ));
    }
    if stats.evicted_groups > 0 {
        out.push(SessionStat::number("Evicted groups", stats.evicted_groups));
    }
    if stats.dropped_records > 0 {
        out.push(SessionStat::number("Dropped records", stats.dropped_records));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TPS: u64 = 4_194_304;

    #[test]
    fn ticks_format() {
        assert_eq!(format_ticks(0, TPS), "0:00:00.000");
        assert_eq!(format_ticks(TPS / 2, TPS), "0:00:00.500");
        assert_eq!(format_ticks(TPS * 61, TPS), "0:01:01.000");
        assert_eq!(format_ticks(TPS * 3_725 + TPS / 4, TPS), "1:02:05.250");
    }

    #[test]
    fn bytes_format() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(4 * 1024 * 1024), "4.0 MB");
    }

    #[test]
    fn rewind_stats_include_range_when_recorded() {
        let empty = RewindStats {
            capacity: 1024,
            ..RewindStats::default()
        };
        let stats = rewind_stats(&empty, TPS);
        assert_eq!(stats.len(), 3);
        assert_eq!(stats[2].value, "0 B / 1.0 KB");

        let full = RewindStats {
            records: 90,
            groups: 2,
            size: 2048,
            capacity: 4096,
            oldest_ticks: Some(TPS),
            newest_ticks: Some(TPS * 3),
            evicted_groups: 1,
            dropped_records: 0,
        };
        let stats = rewind_stats(&full, TPS);
        let span = stats.iter().find(|s| s.name == "Span").unwrap();
        assert_eq!(span.value, "0:00:02.000");
        assert!(stats.iter().any(|s| s.name == "Evicted groups"));
        assert!(!stats.iter().any(|s| s.name == "Dropped records"));
    }
}
