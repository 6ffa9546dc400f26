use std::time::Duration;

/// Absolute ceiling on retry delay, independent of the task interval.
const BACKOFF_CAP: Duration = Duration::from_secs(3600);

/// Capped exponential backoff: `interval * 2^error_count`, at most one
/// hour.
pub(crate) fn compute_backoff(interval: Duration, error_count: u32) -> Duration {
    let factor = 2u32.saturating_pow(error_count);
    interval.saturating_mul(factor).min(BACKOFF_CAP)
}
