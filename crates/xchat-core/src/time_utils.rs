/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Milliseconds between `mark_ms` and `now_ms`, zero when the mark lies ahead.
pub fn elapsed_since_ms(now_ms: u64, mark_ms: u64) -> u64 {
    now_ms.saturating_sub(mark_ms)
}
