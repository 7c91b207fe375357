//! Microsecond-precision timestamp utilities
//!
//! All timestamps are `i64` microseconds since the Unix epoch, UTC. The
//! floor helpers use exact integer arithmetic against the epoch, never
//! calendar-aware rounding, so they are reproducible on every platform.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};

pub const MICROS_PER_SECOND: i64 = 1_000_000;
pub const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
pub const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;
pub const MICROS_PER_DAY: i64 = 24 * MICROS_PER_HOUR;

/// Current UTC time in microseconds since epoch.
pub fn now_us() -> i64 {
    Utc::now().timestamp_micros()
}

/// Format a timestamp as ISO-8601 with microsecond precision,
/// e.g. `2026-02-10T14:30:00.123456Z`.
pub fn to_iso8601(timestamp_us: i64) -> String {
    match DateTime::<Utc>::from_timestamp_micros(timestamp_us) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
        None => String::from("invalid-timestamp"),
    }
}

/// Parse an ISO-8601 timestamp (`YYYY-MM-DDTHH:MM:SS[.ffffff][Z]`).
///
/// Returns `None` when the string does not parse.
pub fn from_iso8601(s: &str) -> Option<i64> {
    let trimmed = s.trim().trim_end_matches('Z');
    let parsed = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S"))
        .ok()?;
    Some(parsed.and_utc().timestamp_micros())
}

/// Day of week for a timestamp (0 = Sunday ... 6 = Saturday).
pub fn day_of_week(timestamp_us: i64) -> u32 {
    match DateTime::<Utc>::from_timestamp_micros(timestamp_us) {
        Some(dt) => dt.weekday().num_days_from_sunday(),
        None => 0,
    }
}

/// Hour of day (0-23, UTC).
pub fn hour_of_day(timestamp_us: i64) -> u32 {
    match DateTime::<Utc>::from_timestamp_micros(timestamp_us) {
        Some(dt) => dt.hour(),
        None => 0,
    }
}

/// Floor a timestamp to the start of its minute.
#[inline]
pub fn floor_to_minute(timestamp_us: i64) -> i64 {
    (timestamp_us / MICROS_PER_MINUTE) * MICROS_PER_MINUTE
}

/// Floor a timestamp to the start of its hour.
#[inline]
pub fn floor_to_hour(timestamp_us: i64) -> i64 {
    (timestamp_us / MICROS_PER_HOUR) * MICROS_PER_HOUR
}

/// Floor a timestamp to the start of its day (00:00:00 UTC).
#[inline]
pub fn floor_to_day(timestamp_us: i64) -> i64 {
    (timestamp_us / MICROS_PER_DAY) * MICROS_PER_DAY
}

#[inline]
pub fn to_seconds(timestamp_us: i64) -> i64 {
    timestamp_us / MICROS_PER_SECOND
}

#[inline]
pub fn from_seconds(seconds: i64) -> i64 {
    seconds * MICROS_PER_SECOND
}

#[inline]
pub fn to_millis(timestamp_us: i64) -> i64 {
    timestamp_us / 1_000
}

#[inline]
pub fn from_millis(millis: i64) -> i64 {
    millis * 1_000
}
