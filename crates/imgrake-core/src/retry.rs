//! Retry with exponential backoff and jitter

use std::time::Duration;

use rand::Rng;

use crate::error::{ConfigError, FetchError};

/// How many times to attempt an operation and how long to wait in between.
///
/// The wait before attempt `n + 1` is `min(base * 2^(n-1), max_delay)` plus a
/// uniform jitter in `[0, jitter]`. Only errors for which `retryable` returns
/// true are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    pub retryable: fn(&FetchError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(500),
            retryable: FetchError::is_retryable,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retry.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetry(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.base > self.max_delay {
            return Err(ConfigError::InvalidRetry(
                "base delay exceeds max_delay".into(),
            ));
        }
        Ok(())
    }

    /// Deterministic part of the wait after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max_delay)
    }

    /// Full wait after failed attempt `attempt`, jitter included.
    pub fn delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            rng.gen_range(Duration::ZERO..=self.jitter)
        };
        self.backoff(attempt) + jitter
    }

    /// Run `attempt_fn` until it succeeds, fails with a non-retryable error,
    /// or `max_attempts` is used up.
    pub fn run<T>(
        &self,
        label: &str,
        mut attempt_fn: impl FnMut(u32) -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match attempt_fn(attempt) {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_attempts && (self.retryable)(&e) => {
                    let wait = self.delay(attempt, &mut rand::thread_rng());
                    log::debug!(
                        "{label}: attempt {attempt}/{} failed: {e}, retrying in {wait:?}",
                        self.max_attempts
                    );
                    std::thread::sleep(wait);
                }
                Err(e) => {
                    if attempt > 1 {
                        log::debug!("{label}: giving up after {attempt} attempts: {e}");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: Duration::ZERO,
            retryable: FetchError::is_retryable,
        }
    }

    fn transient() -> FetchError {
        FetchError::Transport {
            message: "reset".into(),
            timeout: false,
        }
    }

    #[test]
    fn backoff_exponential_and_capped() {
        let policy = RetryPolicy {
            base: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(4), Duration::from_secs(10));
        assert_eq!(policy.backoff(40), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            base: Duration::from_millis(100),
            jitter: Duration::from_millis(50),
            ..RetryPolicy::default()
        };
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let d = policy.delay(1, &mut rng);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = fast(3);
        let mut rng = StepRng::new(0, 1);
        assert_eq!(policy.delay(2, &mut rng), Duration::from_millis(2));
    }

    #[test]
    fn retries_until_success() {
        let mut calls = 0;
        let out = fast(5).run("test", |_| {
            calls += 1;
            if calls < 3 {
                Err(transient())
            } else {
                Ok(calls)
            }
        });
        assert_eq!(out.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn stops_at_max_attempts() {
        let mut calls = 0;
        let out: Result<(), _> = fast(3).run("test", |_| {
            calls += 1;
            Err(transient())
        });
        assert!(out.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn non_retryable_fails_fast() {
        let mut calls = 0;
        let out: Result<(), _> = fast(5).run("test", |_| {
            calls += 1;
            Err(FetchError::Invalid("no scheme".into()))
        });
        assert!(matches!(out, Err(FetchError::Invalid(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn once_means_one_call() {
        let mut calls = 0;
        let _: Result<(), _> = RetryPolicy::once().run("test", |_| {
            calls += 1;
            Err(transient())
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        assert!(fast(0).validate().is_err());
        assert!(fast(1).validate().is_ok());
    }
}
