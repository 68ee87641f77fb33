//! Timestamp utilities
//!
//! Cache index and key/value cache rows store timestamps as unix milliseconds
//! so that ordering in SQLite is a plain integer comparison.

use chrono::{DateTime, TimeZone, Utc};

/// Current time as unix milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Unix milliseconds `seconds` from now
pub fn millis_from_now(seconds: u64) -> i64 {
    let offset = i64::try_from(seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
    now_millis().saturating_add(offset)
}

/// Convert stored unix milliseconds back to a timestamp
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
