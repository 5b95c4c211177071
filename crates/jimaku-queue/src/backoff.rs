//! Retry backoff: exponential with jitter, capped.

use std::time::Duration;

use rand::Rng;

/// Delay before redelivering a unit that failed on `attempt` (1-based).
///
/// `base * 2^(attempt-1)` with +/-50% jitter so simultaneously failing
/// workers do not stampede the upstream service. `cap` is a hard
/// ceiling: it bounds the jittered value, not just the exponential.
#[must_use]
pub fn retry_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let scaled = base.as_secs_f64() * f64::from(1u32 << exponent);
    let jitter = rand::rng().random_range(0.5..=1.5);
    Duration::from_secs_f64((scaled * jitter).min(cap.as_secs_f64()))
}
