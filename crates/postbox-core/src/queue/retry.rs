//! Retry policy: decides backoff delays.

use std::time::Duration;

use rand::Rng;

/// Retry policy for failed jobs.
///
/// Exponential backoff `base_delay * multiplier^(attempts - 1)`, capped at
/// `max_delay`, plus a uniformly random extra of up to `jitter`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for the backoff part of the delay.
    pub max_delay: Duration,

    /// Maximum random extra added on top of the backoff.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// No delay between attempts. Handy for tests.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Backoff for the retry after `attempts` executions (1-indexed), without jitter.
    ///
    /// Example with base_delay=2s, multiplier=2.0:
    /// - attempt 1 (first failure): 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);

        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before the next retry, jitter included.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let backoff = self.backoff(attempts);
        if self.jitter.is_zero() {
            return backoff;
        }

        let extra_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        backoff + Duration::from_millis(extra_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(3, 8)]
    #[case(8, 256)]
    #[case(9, 300)]
    #[case(200, 300)]
    fn exponential_backoff_is_capped(#[case] attempts: u32, #[case] expected_secs: u64) {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(attempts), Duration::from_secs(expected_secs));
    }

    #[test]
    fn attempt_zero_uses_base_delay() {
        assert_eq!(RetryPolicy::default().backoff(0), Duration::from_secs(2));
    }

    #[test]
    fn overflowing_multiplier_falls_back_to_max() {
        let policy = RetryPolicy {
            multiplier: 1e300,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(50), policy.max_delay);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: Duration::from_millis(500),
            ..RetryPolicy::default()
        };

        for _ in 0..100 {
            let delay = policy.next_delay(1);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_millis(2500));
        }
    }

    #[test]
    fn immediate_policy_never_waits() {
        assert_eq!(RetryPolicy::immediate().next_delay(5), Duration::ZERO);
    }
}
