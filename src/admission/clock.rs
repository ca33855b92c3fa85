//! Millisecond timestamps used by the admission stores.
//!
//! All bookkeeping is done in Unix epoch milliseconds so that records can be
//! compared and tested without a real clock.

use chrono::{DateTime, TimeZone, Utc};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// `now + duration_ms`, saturating instead of overflowing.
pub fn deadline(now: i64, duration_ms: u64) -> i64 {
    now.saturating_add(i64::try_from(duration_ms).unwrap_or(i64::MAX))
}

/// Whole seconds until `until`, rounded up. Zero once `until` has passed.
pub fn retry_after_secs(until: i64, now: i64) -> u64 {
    let remaining = until.saturating_sub(now);
    if remaining <= 0 {
        0
    } else {
        (remaining as u64).div_ceil(1000)
    }
}

/// Convert epoch milliseconds to a UTC timestamp for display.
pub fn to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
