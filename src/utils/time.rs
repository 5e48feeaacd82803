//! Timestamp helpers for header stamping and timeout checks.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current unix time in milliseconds.
///
/// Saturates to 0 if the system clock is before the epoch; callers treat a
/// non-positive timestamp as invalid anyway.
pub fn unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Whether `then_ms` is older than `timeout` relative to `now_ms`.
pub fn is_stale(now_ms: i64, then_ms: i64, timeout: Duration) -> bool {
    now_ms.saturating_sub(then_ms) > timeout.as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_ms_is_positive() {
        assert!(unix_ms() > 0);
    }

    #[test]
    fn staleness_boundary() {
        let timeout = Duration::from_secs(30);
        assert!(!is_stale(60_000, 31_000, timeout)); // 29s old: fresh
        assert!(!is_stale(60_000, 30_000, timeout)); // exactly 30s: not yet stale
        assert!(is_stale(60_000, 29_999, timeout)); // past 30s: stale
    }
}
