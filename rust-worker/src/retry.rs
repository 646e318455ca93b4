//! Bounded exponential backoff for mail delivery.

use std::time::Duration;

/// How often and how patiently a failed send is retried.
///
/// Delays double from `base_delay` and are capped at `max_delay`, so the
/// sequence returned by [`RetryPolicy::delay_for`] never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// At least one attempt is always made; `max_delay` never drops below `base_delay`.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether another attempt may follow attempt number `attempt`.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(500), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_until_capped() {
        let policy = RetryPolicy::new(6, Duration::from_millis(500), Duration::from_secs(3));

        let delays: Vec<u128> = (1..=5).map(|a| policy.delay_for(a).as_millis()).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 3000, 3000]);
    }

    #[test]
    fn test_delays_never_decrease() {
        let policy = RetryPolicy::new(64, Duration::from_millis(250), Duration::from_secs(60));

        let delays: Vec<Duration> = (1..=64).map(|a| policy.delay_for(a)).collect();
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(delays[63], Duration::from_secs(60));
    }

    #[test]
    fn test_at_least_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10), Duration::from_millis(1));

        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.allows_retry_after(1));
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
    }

    #[test]
    fn test_allows_retry_after() {
        let policy = RetryPolicy::default();

        assert!(policy.allows_retry_after(4));
        assert!(!policy.allows_retry_after(5));
    }
}
