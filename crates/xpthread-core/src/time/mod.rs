//! Wall-clock time source.
//!
//! Provides the normalized `(seconds, nanoseconds)` realtime reading used to
//! evaluate absolute timed-lock deadlines, plus the RFC 3339 rendering used for
//! structured-log timestamps.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Nanoseconds per second.
pub const NSEC_PER_SEC: i64 = 1_000_000_000;

/// Represents a timespec value (seconds + nanoseconds).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    /// Seconds since the Unix epoch (negative before 1970).
    pub tv_sec: i64,
    /// Nanoseconds (0 to 999_999_999).
    pub tv_nsec: i64,
}

impl Timespec {
    /// Build a timespec, carrying any out-of-range nanoseconds into seconds.
    #[must_use]
    pub const fn new(tv_sec: i64, tv_nsec: i64) -> Self {
        let carry = tv_nsec.div_euclid(NSEC_PER_SEC);
        Self {
            tv_sec: tv_sec.saturating_add(carry),
            tv_nsec: tv_nsec.rem_euclid(NSEC_PER_SEC),
        }
    }

    /// Returns `true` when `tv_nsec` lies in `[0, 1e9)`.
    #[must_use]
    pub const fn is_normalized(self) -> bool {
        self.tv_nsec >= 0 && self.tv_nsec < NSEC_PER_SEC
    }

    /// This instant shifted forward by `delta`, saturating at `i64::MAX` seconds.
    #[must_use]
    pub fn after(self, delta: Duration) -> Self {
        let secs = i64::try_from(delta.as_secs()).unwrap_or(i64::MAX);
        Self::new(
            self.tv_sec.saturating_add(secs),
            self.tv_nsec + i64::from(delta.subsec_nanos()),
        )
    }

    /// Time left from `now` until `self`, or `None` if `self` is not in the future.
    #[must_use]
    pub fn remaining_since(self, now: Timespec) -> Option<Duration> {
        let deadline = Self::new(self.tv_sec, self.tv_nsec);
        let now = Self::new(now.tv_sec, now.tv_nsec);
        let mut sec_diff = deadline.tv_sec.checked_sub(now.tv_sec)?;
        let mut nsec_diff = deadline.tv_nsec - now.tv_nsec;
        if nsec_diff < 0 {
            nsec_diff += NSEC_PER_SEC;
            sec_diff -= 1;
        }
        if sec_diff < 0 || (sec_diff == 0 && nsec_diff == 0) {
            return None;
        }
        Some(Duration::new(sec_diff as u64, nsec_diff as u32))
    }
}

impl From<Duration> for Timespec {
    fn from(d: Duration) -> Self {
        Self::new(
            i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
            i64::from(d.subsec_nanos()),
        )
    }
}

/// Current realtime clock reading, always normalized.
///
/// A system clock set before the epoch yields a negative `tv_sec` with a
/// non-negative `tv_nsec`; callers never see a clock error.
#[must_use]
pub fn now() -> Timespec {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(since) => Timespec::from(since),
        Err(before) => {
            let d = before.duration();
            Timespec::new(
                -i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
                -i64::from(d.subsec_nanos()),
            )
        }
    }
}

/// Civil `(year, month 1-12, day 1-31)` for a count of days since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    // Eras are 400-year cycles starting on March 1st, so the leap day is last.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// RFC 3339 UTC rendering with millisecond precision.
#[must_use]
pub fn format_utc(ts: Timespec) -> String {
    let days = ts.tv_sec.div_euclid(86_400);
    let secs = ts.tv_sec.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        secs / 3_600,
        (secs / 60) % 60,
        secs % 60,
        ts.tv_nsec / 1_000_000,
    )
}
