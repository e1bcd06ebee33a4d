//! Retry budget and exponential backoff.

use std::time::Duration;

/// How transient failures are retried.
///
/// The delay before retry `n` (1-based) is `min(base_delay * 2^(n-1), max_delay)`.
/// Once `max_retries` retries have been spent the next failure exhausts the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

/// What to do after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt; `retry_count` is the new count.
    Retry { retry_count: u32, delay: Duration },

    /// The budget is spent.
    Exhausted { retry_count: u32 },
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Backoff before the `retry_count`-th retry.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Decides the fate of an event that has already been retried `retry_count` times.
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count < self.max_retries {
            let next = retry_count + 1;
            RetryDecision::Retry {
                retry_count: next,
                delay: self.delay_for(next),
            }
        } else {
            RetryDecision::Exhausted { retry_count }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(5), Duration::from_secs(60))
    }

    #[test]
    fn delay_doubles_per_retry() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_secs(5));
        assert_eq!(p.delay_for(2), Duration::from_secs(10));
        assert_eq!(p.delay_for(3), Duration::from_secs(20));
        assert_eq!(p.delay_for(4), Duration::from_secs(40));
    }

    #[test]
    fn delay_is_capped() {
        let p = policy();
        assert_eq!(p.delay_for(5), Duration::from_secs(60));
        assert_eq!(p.delay_for(64), Duration::from_secs(60));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn decide_retries_until_budget_spent() {
        let p = policy();
        assert_eq!(
            p.decide(0),
            RetryDecision::Retry {
                retry_count: 1,
                delay: Duration::from_secs(5)
            }
        );
        assert_eq!(
            p.decide(2),
            RetryDecision::Retry {
                retry_count: 3,
                delay: Duration::from_secs(20)
            }
        );
        assert_eq!(p.decide(3), RetryDecision::Exhausted { retry_count: 3 });
    }

    #[test]
    fn zero_budget_exhausts_immediately() {
        let p = RetryPolicy::new(0, Duration::from_secs(1), Duration::from_secs(1));
        assert_eq!(p.decide(0), RetryDecision::Exhausted { retry_count: 0 });
    }
}
