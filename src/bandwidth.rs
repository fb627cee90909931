//! Bandwidth accounting for a session.
//!
//! [`SessionStats`] keeps a cumulative and a windowed byte count. The window is
//! reset every time a snapshot is taken; the cumulative part lives as long as
//! the value does, so a caller repeating sessions can carry it forward.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Default spacing between two bandwidth snapshots.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(1);

const BINARY_PREFIXES: [&str; 6] = ["", "Ki", "Mi", "Gi", "Ti", "Pi"];

/// Byte counters for one session, or for a chain of repeated sessions.
///
/// # Examples
///
/// ```
/// use echoprobe::bandwidth::SessionStats;
/// use std::time::{Duration, Instant};
///
/// let start = Instant::now();
/// let mut stats = SessionStats::starting_at(start, Duration::from_secs(1));
/// stats.record(1_000);
///
/// // Not a full interval yet
/// assert!(stats.maybe_report(start + Duration::from_millis(500), false).is_none());
///
/// let snapshot = stats.maybe_report(start + Duration::from_secs(2), false).unwrap();
/// assert_eq!(snapshot.total_bytes, 1_000);
/// assert_eq!(snapshot.average_bps, Some(4_000.0));
/// ```
#[derive(Debug, Clone)]
pub struct SessionStats {
    session_start: Instant,
    window_start: Instant,
    total_bytes: u64,
    window_bytes: u64,
    interval: Duration,
}

impl SessionStats {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    pub fn starting_at(now: Instant, interval: Duration) -> Self {
        Self {
            session_start: now,
            window_start: now,
            total_bytes: 0,
            window_bytes: 0,
            interval,
        }
    }

    /// Changes the snapshot spacing, keeping the counters.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Adds `bytes` to both the cumulative and the windowed totals.
    pub fn record(&mut self, bytes: u64) {
        self.total_bytes += bytes;
        self.window_bytes += bytes;
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn window_bytes(&self) -> u64 {
        self.window_bytes
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.session_start)
    }

    /// Takes a snapshot if `force` is set or a full interval has passed
    /// since the previous one, then starts a new window.
    pub fn maybe_report(&mut self, now: Instant, force: bool) -> Option<BandwidthSnapshot> {
        let window = now.saturating_duration_since(self.window_start);
        if !force && window < self.interval {
            return None;
        }

        let snapshot = self.snapshot(now);
        self.window_start = now;
        self.window_bytes = 0;
        Some(snapshot)
    }

    /// Current figures without touching the window.
    pub fn snapshot(&self, now: Instant) -> BandwidthSnapshot {
        let elapsed = self.elapsed(now);
        let window = now.saturating_duration_since(self.window_start);
        BandwidthSnapshot {
            elapsed,
            window,
            total_bytes: self.total_bytes,
            window_bytes: self.window_bytes,
            average_bps: bits_per_second(self.total_bytes, elapsed),
            instant_bps: bits_per_second(self.window_bytes, window),
        }
    }
}

/// Rate over `elapsed`, or `None` when no time has passed.
fn bits_per_second(bytes: u64, elapsed: Duration) -> Option<f64> {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        Some(bytes as f64 * 8.0 / secs)
    } else {
        None
    }
}

/// Point-in-time bandwidth figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandwidthSnapshot {
    /// Time since the session (or chain of sessions) started
    pub elapsed: Duration,
    /// Length of the window that just closed
    pub window: Duration,
    pub total_bytes: u64,
    pub window_bytes: u64,
    /// Average over the whole session, `None` while no time has elapsed
    pub average_bps: Option<f64>,
    /// Rate over the last window, `None` for an empty window
    pub instant_bps: Option<f64>,
}

/// A value divided down by powers of 1024 with its unit prefix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaled {
    pub value: f64,
    pub prefix: &'static str,
}

impl fmt::Display for Scaled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.value, self.prefix)
    }
}

/// Scales `value` to the largest binary prefix keeping it above 1024 or
/// running out of prefixes.
///
/// # Examples
///
/// ```
/// use echoprobe::bandwidth::scale_binary;
///
/// let s = scale_binary(3.0 * 1024.0 * 1024.0);
/// assert_eq!(s.value, 3.0);
/// assert_eq!(s.prefix, "Mi");
/// assert_eq!(scale_binary(512.0).prefix, "");
/// ```
pub fn scale_binary(value: f64) -> Scaled {
    let mut value = value;
    let mut idx = 0;
    while value > 1024.0 && idx < BINARY_PREFIXES.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    Scaled {
        value,
        prefix: BINARY_PREFIXES[idx],
    }
}

fn write_rate(f: &mut fmt::Formatter<'_>, head: &str, rate: Option<f64>) -> fmt::Result {
    match rate {
        Some(bps) => write!(f, "[{}{}bps]", head, scale_binary(bps)),
        None => write!(f, "[{}? bps]", head),
    }
}

impl fmt::Display for BandwidthSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_rate(f, "avg:", self.average_bps)?;
        write_rate(f, "now:", self.instant_bps)?;
        write!(f, "[size:{}B]", scale_binary(self.total_bytes as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates_both_counters() {
        let mut stats = SessionStats::new(DEFAULT_REPORT_INTERVAL);
        stats.record(100);
        stats.record(50);
        assert_eq!(stats.total_bytes(), 150);
        assert_eq!(stats.window_bytes(), 150);
    }

    #[test]
    fn test_with_interval_keeps_counters() {
        let start = Instant::now();
        let mut stats = SessionStats::starting_at(start, Duration::from_secs(3600));
        stats.record(512);

        let mut stats = stats.with_interval(Duration::from_millis(10));
        assert_eq!(stats.interval(), Duration::from_millis(10));
        assert_eq!(stats.total_bytes(), 512);
        assert!(stats
            .maybe_report(start + Duration::from_millis(10), false)
            .is_some());
    }

    #[test]
    fn test_report_resets_window_only() {
        let start = Instant::now();
        let mut stats = SessionStats::starting_at(start, Duration::from_secs(1));
        stats.record(2048);

        let first = stats.maybe_report(start + Duration::from_secs(1), false).unwrap();
        assert_eq!(first.window_bytes, 2048);
        assert_eq!(first.instant_bps, Some(16384.0));
        assert_eq!(stats.window_bytes(), 0);
        assert_eq!(stats.total_bytes(), 2048);

        stats.record(1024);
        let second = stats.maybe_report(start + Duration::from_secs(2), false).unwrap();
        assert_eq!(second.window_bytes, 1024);
        assert_eq!(second.total_bytes, 3072);
        assert_eq!(second.average_bps, Some(12288.0));
        assert_eq!(second.instant_bps, Some(8192.0));
    }

    #[test]
    fn test_zero_elapsed_is_unknown_rate() {
        let start = Instant::now();
        let mut stats = SessionStats::starting_at(start, Duration::from_secs(1));
        stats.record(1_000_000);

        let snapshot = stats.maybe_report(start, true).unwrap();
        assert_eq!(snapshot.average_bps, None);
        assert_eq!(snapshot.instant_bps, None);
        assert_eq!(snapshot.total_bytes, 1_000_000);
    }

    #[test]
    fn test_rates_never_negative() {
        let start = Instant::now();
        let mut stats = SessionStats::starting_at(start, Duration::from_millis(1));
        for ms in [0u64, 1, 5, 1000] {
            stats.record(ms * 10);
            if let Some(s) = stats.maybe_report(start + Duration::from_millis(ms), true) {
                for rate in [s.average_bps, s.instant_bps].into_iter().flatten() {
                    assert!(rate.is_finite());
                    assert!(rate >= 0.0);
                }
            }
        }
    }

    #[test]
    fn test_scale_binary_prefixes() {
        assert_eq!(scale_binary(0.0).prefix, "");
        assert_eq!(scale_binary(1024.0).prefix, "");
        assert_eq!(scale_binary(1025.0).prefix, "Ki");
        assert_eq!(scale_binary(5.0 * 1024f64.powi(4)).prefix, "Ti");

        // stops at the last prefix instead of running off the table
        let huge = scale_binary(1024f64.powi(8));
        assert_eq!(huge.prefix, "Pi");
        assert_eq!(huge.value, 1024f64.powi(3));
    }

    #[test]
    fn test_snapshot_display() {
        let start = Instant::now();
        let mut stats = SessionStats::starting_at(start, Duration::from_secs(1));
        stats.record(2048);
        let s = stats.maybe_report(start + Duration::from_secs(2), true).unwrap();
        assert_eq!(
            s.to_string(),
            "[avg:8.00 Kibps][now:8.00 Kibps][size:2.00 KiB]"
        );

        let empty = SessionStats::starting_at(start, Duration::from_secs(1)).snapshot(start);
        assert_eq!(empty.to_string(), "[avg:? bps][now:? bps][size:0.00 B]");
    }
}
