use rand::Rng;
use std::time::Duration;

/// Random delay between result lookups, so concurrent callers do not query
/// the pool in lockstep.
pub fn random_retry_delay(min_ms: u64, max_ms: u64) -> Duration {
    let mut rng = rand::thread_rng();
    let delay_ms = rng.gen_range(min_ms..=max_ms);
    Duration::from_millis(delay_ms)
}
