use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter for SSE reconnect attempts, capped so
/// a long outage doesn't push the interval out indefinitely. Mirrors the
/// teacher's `core::util::backoff`, with an upper bound added since this
/// loop runs for the lifetime of the process rather than a bounded
/// number of retries.
pub fn backoff(attempt: u64) -> Duration {
    let capped_attempt = attempt.min(8);
    let base_delay_ms = 200u64 * (1u64 << (capped_attempt - 1));
    let jitter = rand::rng().random_range(0.8..1.2);
    let delay_ms = (base_delay_ms as f64 * jitter) as u64;
    Duration::from_millis(delay_ms).min(Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_is_roughly_200ms() {
        let d = backoff(1);
        assert!(d >= Duration::from_millis(160) && d <= Duration::from_millis(240));
    }

    #[test]
    fn delay_is_capped_for_large_attempt_counts() {
        let d = backoff(100);
        assert!(d <= Duration::from_secs(30));
    }
}
