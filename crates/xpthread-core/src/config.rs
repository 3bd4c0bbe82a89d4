//! Runtime configuration.
//!
//! Settings are read once from the environment and cached:
//! - `XPTHREAD_LOG`: minimum structured-log level (`off` by default,
//!   `error`, `warn`, `info`, `debug`, `trace`).
//! - `XPTHREAD_LOG_FILE`: JSONL destination; stderr when unset.
//! - `XPTHREAD_POLL_INTERVAL_US`: polling interval of the emulated timed lock.
//!
//! Resolution uses a non-blocking atomic state machine rather than `OnceLock`
//! so that a log emission racing the first read sees the default instead of
//! waiting on it.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use crate::structured_log::LogLevel;

/// Default polling interval for the emulated timed lock.
pub const TIMED_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Smallest accepted polling interval override.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_micros(50);
/// Largest accepted polling interval override.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum level that reaches the log sink; `Off` silences everything.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogThreshold {
    #[default]
    Off,
    At(LogLevel),
}

impl LogThreshold {
    /// Parse from string (case-insensitive). Unknown values mean `Off`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "all" => Self::At(LogLevel::Trace),
            "debug" => Self::At(LogLevel::Debug),
            "info" | "on" | "1" => Self::At(LogLevel::Info),
            "warn" | "warning" => Self::At(LogLevel::Warn),
            "error" => Self::At(LogLevel::Error),
            _ => Self::Off,
        }
    }

    /// Returns true if an entry at `level` passes this threshold.
    #[must_use]
    pub fn admits(self, level: LogLevel) -> bool {
        match self {
            Self::Off => false,
            Self::At(min) => level >= min,
        }
    }
}

// Atomic cache: 0=unresolved, 255=resolving, otherwise encoded threshold.
static CACHED_THRESHOLD: AtomicU8 = AtomicU8::new(0);
// 0=unresolved, u64::MAX=resolving, otherwise microseconds.
static CACHED_POLL_US: AtomicU64 = AtomicU64::new(0);

const THRESHOLD_UNRESOLVED: u8 = 0;
const THRESHOLD_OFF: u8 = 1;
const THRESHOLD_RESOLVING: u8 = 255;
const POLL_UNRESOLVED: u64 = 0;
const POLL_RESOLVING: u64 = u64::MAX;

fn threshold_to_u8(threshold: LogThreshold) -> u8 {
    match threshold {
        LogThreshold::Off => THRESHOLD_OFF,
        LogThreshold::At(LogLevel::Trace) => 2,
        LogThreshold::At(LogLevel::Debug) => 3,
        LogThreshold::At(LogLevel::Info) => 4,
        LogThreshold::At(LogLevel::Warn) => 5,
        LogThreshold::At(LogLevel::Error) => 6,
        LogThreshold::At(LogLevel::Fatal) => 7,
    }
}

fn u8_to_threshold(v: u8) -> LogThreshold {
    match v {
        2 => LogThreshold::At(LogLevel::Trace),
        3 => LogThreshold::At(LogLevel::Debug),
        4 => LogThreshold::At(LogLevel::Info),
        5 => LogThreshold::At(LogLevel::Warn),
        6 => LogThreshold::At(LogLevel::Error),
        7 => LogThreshold::At(LogLevel::Fatal),
        _ => LogThreshold::Off,
    }
}

/// Configured log threshold (reads `XPTHREAD_LOG` on first call).
#[must_use]
pub fn log_threshold() -> LogThreshold {
    let cached = CACHED_THRESHOLD.load(Ordering::Relaxed);
    if cached != THRESHOLD_UNRESOLVED && cached != THRESHOLD_RESOLVING {
        return u8_to_threshold(cached);
    }
    if cached == THRESHOLD_RESOLVING {
        return LogThreshold::Off;
    }
    if CACHED_THRESHOLD
        .compare_exchange(
            THRESHOLD_UNRESOLVED,
            THRESHOLD_RESOLVING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        let v = CACHED_THRESHOLD.load(Ordering::Relaxed);
        return if v != THRESHOLD_UNRESOLVED && v != THRESHOLD_RESOLVING {
            u8_to_threshold(v)
        } else {
            LogThreshold::Off
        };
    }

    let threshold = std::env::var("XPTHREAD_LOG")
        .map(|v| LogThreshold::from_str_loose(&v))
        .unwrap_or_default();
    CACHED_THRESHOLD.store(threshold_to_u8(threshold), Ordering::Release);
    threshold
}

/// Override the log threshold for the rest of the process.
pub fn set_log_threshold(threshold: LogThreshold) {
    CACHED_THRESHOLD.store(threshold_to_u8(threshold), Ordering::Release);
}

/// Destination file for log lines, if configured.
#[must_use]
pub fn log_file() -> Option<std::path::PathBuf> {
    std::env::var_os("XPTHREAD_LOG_FILE")
        .filter(|v| !v.is_empty())
        .map(std::path::PathBuf::from)
}

fn parse_poll_interval(raw: &str) -> Duration {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_micros)
        .map(|d| d.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL))
        .unwrap_or(TIMED_LOCK_POLL_INTERVAL)
}

fn duration_to_us(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(POLL_RESOLVING - 1)
}

/// Polling interval of the emulated timed lock.
///
/// Defaults to [`TIMED_LOCK_POLL_INTERVAL`]; `XPTHREAD_POLL_INTERVAL_US`
/// overrides it within [`MIN_POLL_INTERVAL`] ..= [`MAX_POLL_INTERVAL`].
#[must_use]
pub fn poll_interval() -> Duration {
    let cached = CACHED_POLL_US.load(Ordering::Relaxed);
    if cached != POLL_UNRESOLVED && cached != POLL_RESOLVING {
        return Duration::from_micros(cached);
    }
    if cached == POLL_RESOLVING
        || CACHED_POLL_US
            .compare_exchange(
                POLL_UNRESOLVED,
                POLL_RESOLVING,
                Ordering::SeqCst,
                Ordering::Relaxed,
            )
            .is_err()
    {
        return TIMED_LOCK_POLL_INTERVAL;
    }

    let interval = std::env::var("XPTHREAD_POLL_INTERVAL_US")
        .map(|v| parse_poll_interval(&v))
        .unwrap_or(TIMED_LOCK_POLL_INTERVAL);
    CACHED_POLL_US.store(duration_to_us(interval), Ordering::Release);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_thresholds() {
        assert_eq!(LogThreshold::from_str_loose("off"), LogThreshold::Off);
        assert_eq!(LogThreshold::from_str_loose(""), LogThreshold::Off);
        assert_eq!(LogThreshold::from_str_loose("bogus"), LogThreshold::Off);
        assert_eq!(
            LogThreshold::from_str_loose("DEBUG"),
            LogThreshold::At(LogLevel::Debug)
        );
        assert_eq!(
            LogThreshold::from_str_loose(" warning "),
            LogThreshold::At(LogLevel::Warn)
        );
        assert_eq!(
            LogThreshold::from_str_loose("on"),
            LogThreshold::At(LogLevel::Info)
        );
    }

    #[test]
    fn threshold_admits_equal_or_more_severe() {
        let info = LogThreshold::At(LogLevel::Info);
        assert!(info.admits(LogLevel::Info));
        assert!(info.admits(LogLevel::Error));
        assert!(!info.admits(LogLevel::Debug));
        assert!(!LogThreshold::Off.admits(LogLevel::Fatal));
    }

    #[test]
    fn threshold_encoding_roundtrips() {
        for t in [
            LogThreshold::Off,
            LogThreshold::At(LogLevel::Trace),
            LogThreshold::At(LogLevel::Warn),
            LogThreshold::At(LogLevel::Fatal),
        ] {
            assert_eq!(u8_to_threshold(threshold_to_u8(t)), t);
        }
    }

    #[test]
    fn poll_interval_parse_clamps_and_defaults() {
        assert_eq!(parse_poll_interval("250"), Duration::from_micros(250));
        assert_eq!(parse_poll_interval("1"), MIN_POLL_INTERVAL);
        assert_eq!(parse_poll_interval("99999999"), MAX_POLL_INTERVAL);
        assert_eq!(parse_poll_interval("fast"), TIMED_LOCK_POLL_INTERVAL);
    }

    #[test]
    fn poll_interval_is_within_bounds() {
        let d = poll_interval();
        assert!(d >= MIN_POLL_INTERVAL && d <= MAX_POLL_INTERVAL);
    }
}
