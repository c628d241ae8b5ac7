//! Exponential backoff with jitter.
//!
//! Used between attempts at reading an artifact that is still being written
//! and before re-submitting paths that reported "retry later".

use std::time::Duration;
use rand::Rng;

/// Calculate exponential backoff delay with jitter.
///
/// Attempt 0 yields no delay. The delay doubles per attempt from `base_ms`,
/// is capped at `max_ms` and then gets up to 10% of jitter on top.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let capped_delay = base_ms.saturating_mul(exponential_base).min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Fixed delay with the same jitter band, for single retries.
pub fn jittered(delay: Duration) -> Duration {
    let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    calculate_backoff(1, ms, ms)
}
