//! Bounded retry policy shared by connectors and embedding providers.
//!
//! Distinguishes three classes of failure: rate-limited (wait until the
//! limiter's reset time when known, otherwise back off exponentially),
//! transient (back off exponentially), and fatal (no retry).

use std::time::Duration;

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Rate limit hit; `reset_unix` is the limiter's reset time (epoch
    /// seconds) when the response carried one.
    RateLimited { reset_unix: Option<i64> },
    /// Transient failure (network error, 5xx): retry with backoff.
    Transient,
    /// Non-retryable failure.
    Fatal,
}

/// Bounded retry policy: `max_attempts` tries with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Exponential backoff for the given zero-based attempt number:
    /// base, 2×base, 4×base, … capped at 2^5 × base.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << attempt.min(5))
    }

    /// Delay before the next attempt, honoring a rate limiter's reset time
    /// when one was reported and lies in the future.
    pub fn delay_for(&self, attempt: u32, class: RetryClass) -> Duration {
        match class {
            RetryClass::RateLimited {
                reset_unix: Some(reset),
            } => {
                let now = chrono::Utc::now().timestamp();
                if reset > now {
                    // +1s of slack so we do not race the limiter window.
                    Duration::from_secs((reset - now) as u64 + 1)
                } else {
                    self.backoff(attempt)
                }
            }
            _ => self.backoff(attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(8, Duration::from_secs(1));
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(16));
        assert_eq!(policy.backoff(5), Duration::from_secs(32));
        assert_eq!(policy.backoff(20), Duration::from_secs(32));
    }

    #[test]
    fn test_should_retry_bounded() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn test_rate_limit_waits_until_reset() {
        let policy = RetryPolicy::default();
        let reset = chrono::Utc::now().timestamp() + 30;
        let delay = policy.delay_for(
            0,
            RetryClass::RateLimited {
                reset_unix: Some(reset),
            },
        );
        assert!(delay >= Duration::from_secs(28) && delay <= Duration::from_secs(32));
    }

    #[test]
    fn test_rate_limit_without_reset_backs_off() {
        let policy = RetryPolicy::default();
        let delay = policy.delay_for(2, RetryClass::RateLimited { reset_unix: None });
        assert_eq!(delay, Duration::from_secs(4));
    }

    #[test]
    fn test_stale_reset_falls_back_to_backoff() {
        let policy = RetryPolicy::default();
        let reset = chrono::Utc::now().timestamp() - 10;
        let delay = policy.delay_for(
            1,
            RetryClass::RateLimited {
                reset_unix: Some(reset),
            },
        );
        assert_eq!(delay, Duration::from_secs(2));
    }
}
