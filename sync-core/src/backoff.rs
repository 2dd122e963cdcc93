//! Retry backoff for transient provider and store failures.

use std::time::Duration;

/// Calculate the delay before retry number `attempt` (starting at 1).
///
/// Exponential in the attempt, capped at `max`, plus up to a quarter of the
/// delay as random jitter so that many shards retrying against one provider
/// spread out.
///
/// Formula: min(max, base * 2^(attempt - 1)) + random(0..=delay / 4)
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = base.saturating_mul(1u32 << exponent).min(max);

    let jitter_cap = u64::try_from(delay.as_millis() / 4).unwrap_or(u64::MAX);
    delay + Duration::from_millis(random_jitter_ms(jitter_cap))
}

/// Random milliseconds in `0..=cap`; zero if the OS has no randomness.
fn random_jitter_ms(cap: u64) -> u64 {
    if cap == 0 {
        return 0;
    }
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes) % (cap + 1),
        Err(_) => 0,
    }
}
