//! Wall-clock helpers.

use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone};

/// Timestamp layout used in diagnostics (`yyyy-MM-dd HH:mm:ss`).
pub const LONG_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Milliseconds since the Unix epoch; 0 if the clock is before the epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Render a timestamp with [`LONG_FORMAT`].
pub fn format_timestamp<Tz>(at: DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    at.format(LONG_FORMAT).to_string()
}
