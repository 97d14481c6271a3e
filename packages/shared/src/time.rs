use chrono::{DateTime, FixedOffset, Utc};

/// Get current Unix timestamp (milliseconds)
pub fn current_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Format a Unix timestamp (milliseconds) as RFC 3339 in JST (UTC+9)
pub fn timestamp_to_jst_rfc3339(millis: i64) -> String {
    let Some(jst_offset) = FixedOffset::east_opt(9 * 3600) else {
        return millis.to_string();
    };
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(utc) => utc.with_timezone(&jst_offset).to_rfc3339(),
        None => millis.to_string(),
    }
}

/// Format a Unix timestamp (milliseconds) as `HH:MM:SS` in JST, for chat lines
pub fn timestamp_to_jst_clock(millis: i64) -> String {
    let Some(jst_offset) = FixedOffset::east_opt(9 * 3600) else {
        return millis.to_string();
    };
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(utc) => utc.with_timezone(&jst_offset).format("%H:%M:%S").to_string(),
        None => millis.to_string(),
    }
}
