//! Timestamp serialization.

use chrono::{DateTime, Local};
use serde::Serializer;

/// RFC 3339 with second precision and numeric offset, e.g. `2024-03-01T10:15:30+01:00`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

pub fn format_timestamp(time: &DateTime<Local>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// `serialize_with` helper for timestamps without sub-second noise.
pub fn serialize_seconds<S>(time: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_timestamp(time))
}

/// Optional variant of [`serialize_seconds`]; `None` becomes `null`.
pub fn serialize_seconds_opt<S>(
    time: &Option<DateTime<Local>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match time {
        Some(time) => serializer.serialize_str(&format_timestamp(time)),
        None => serializer.serialize_none(),
    }
}
