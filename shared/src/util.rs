/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Milliseconds in one hour
pub const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;

/// Convert a (possibly fractional) hour count to milliseconds, rounded to the
/// nearest millisecond.
pub fn hours_to_millis(hours: f64) -> i64 {
    (hours * MILLIS_PER_HOUR as f64).round() as i64
}

/// Format a millisecond timestamp as RFC 3339 for logs and messages.
///
/// Out-of-range timestamps fall back to the raw number.
pub fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}
