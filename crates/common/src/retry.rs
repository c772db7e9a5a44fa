//! Bounded-retry combinator.
//!
//! Operations report each attempt as an [`Attempt`] instead of raising errors
//! across component boundaries. [`retry`] drives the attempts according to a
//! [`RetryPolicy`] and returns either the value or a [`RetryError`] saying
//! whether the failure was permanent or the attempts ran out.

use std::future::Future;
use std::time::Duration;

/// Result of a single attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Success(T),
    /// Worth retrying. `retry_after` overrides the policy delay when the
    /// remote side asked for a specific wait.
    Transient {
        error: E,
        retry_after: Option<Duration>,
    },
    /// Retrying cannot help.
    Permanent(E),
}

impl<T, E> Attempt<T, E> {
    pub fn transient(error: E) -> Self {
        Attempt::Transient {
            error,
            retry_after: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay between every attempt.
    Fixed(Duration),
    /// `base * 2^(n-1)` after the n-th failure, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; at least 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// `max_retries` retries after the first attempt, with a fixed delay.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential { base, max },
        }
    }

    /// Delay to wait after the `failed_attempt`-th attempt (1-based) failed.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let exp = failed_attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << exp).min(max)
            }
        }
    }
}

/// Terminal failure of a retried operation.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every allowed attempt failed transiently; `last` is the final error.
    Exhausted { attempts: u32, last: E },
    /// An attempt failed permanently and was not retried.
    Permanent { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Permanent { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_error(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Permanent { error, .. } => error,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, RetryError::Permanent { .. })
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy runs out.
///
/// `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Attempt::Success(value) => return Ok(value),
            Attempt::Permanent(error) => {
                return Err(RetryError::Permanent {
                    attempts: attempt,
                    error,
                });
            }
            Attempt::Transient { error, retry_after } => {
                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    });
                }
                let delay = retry_after.unwrap_or_else(|| policy.delay_after(attempt));
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fixed_policy_counts_first_attempt() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(5));
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(3), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_delays_are_capped() {
        let policy =
            RetryPolicy::exponential(6, Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(5), Duration::from_secs(10));
        assert_eq!(policy.delay_after(40), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_secs(2));
        let start = tokio::time::Instant::now();

        let result: Result<u32, RetryError<&str>> = retry(&policy, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Attempt::transient("busy")
                } else {
                    Attempt::Success(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_all_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(2, Duration::from_millis(10));

        let result: Result<(), RetryError<&str>> = retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::transient("down") }
        })
        .await;

        let err = result.unwrap_err();
        assert!(!err.is_permanent());
        assert_eq!(err.attempts(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.into_error(), "down");
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_stops_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(5, Duration::from_secs(1));

        let result: Result<(), RetryError<&str>> = retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Permanent("chat not found") }
        })
        .await;

        assert!(result.unwrap_err().is_permanent());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_overrides_policy_delay() {
        let policy = RetryPolicy::fixed(1, Duration::from_secs(1));
        let start = tokio::time::Instant::now();

        let result: Result<(), RetryError<&str>> = retry(&policy, |attempt| async move {
            if attempt == 1 {
                Attempt::Transient {
                    error: "429",
                    retry_after: Some(Duration::from_secs(30)),
                }
            } else {
                Attempt::Success(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }
}
