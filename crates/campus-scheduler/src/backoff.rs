use std::time::Duration;

/// Delay to wait after the attempt with the given 0-based index failed.
///
/// Doubles from `base` and saturates instead of overflowing.
pub fn compute_backoff(base: Duration, attempt_index: u32) -> Duration {
    let exp = 2u32.saturating_pow(attempt_index);
    base.saturating_mul(exp)
}
