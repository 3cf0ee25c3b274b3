//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Delay before retry number `retry_count + 1`.
///
/// `min(max, base * 2^retry_count)` scaled by a factor drawn from `[0.5, 1.5)`.
pub fn calculate_backoff(retry_count: u32, base: Duration, max: Duration) -> Duration {
    calculate_backoff_with(retry_count, base, max, &mut rand::thread_rng())
}

/// Same as [`calculate_backoff`] with a caller-supplied random source.
pub fn calculate_backoff_with<R: Rng + ?Sized>(
    retry_count: u32,
    base: Duration,
    max: Duration,
    rng: &mut R,
) -> Duration {
    let exponential = 2u64.saturating_pow(retry_count);
    let base_ms = base.as_millis() as u64;
    let capped_ms = base_ms.saturating_mul(exponential).min(max.as_millis() as u64);
    if capped_ms == 0 {
        return Duration::ZERO;
    }

    let jitter: f64 = rng.gen_range(0.5..1.5);
    Duration::from_secs_f64(capped_ms as f64 * jitter / 1000.0)
}
