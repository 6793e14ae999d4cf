//! Bounded Retry
//!
//! Runs an action against a resource that may not be observable yet (a file
//! still being copied into a browser container, a video still being encoded)
//! up to a fixed number of attempts with a fixed delay between them.
//!
//! Only the last failure survives exhaustion; it is handed to a caller-supplied
//! factory so the final error matches the calling domain.

use crate::result::{ScopeError, ScopeResult};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::num::NonZeroU32;
use std::time::Duration;

/// Default number of attempts
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;

/// Default delay between attempts (1 second)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// How many times to attempt an action and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    attempts: NonZeroU32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: NonZeroU32::new(DEFAULT_RETRY_ATTEMPTS).unwrap_or(NonZeroU32::MIN),
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::InvalidRetryCount`] when `retries` is zero.
    pub fn new(retries: u32, delay: Duration) -> ScopeResult<Self> {
        let attempts =
            NonZeroU32::new(retries).ok_or(ScopeError::InvalidRetryCount { retries })?;
        Ok(Self { attempts, delay })
    }

    /// Create a policy from a delay in (fractional) seconds.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero retry count or a negative/non-finite delay.
    pub fn from_secs_f64(retries: u32, delay_secs: f64) -> ScopeResult<Self> {
        let delay = Duration::try_from_secs_f64(delay_secs)
            .map_err(|e| ScopeError::config(format!("invalid retry delay {delay_secs}: {e}")))?;
        Self::new(retries, delay)
    }

    /// Policy with no delay between attempts
    #[must_use]
    pub const fn immediate(attempts: NonZeroU32) -> Self {
        Self {
            attempts,
            delay: Duration::ZERO,
        }
    }

    /// Set the delay
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Maximum number of attempts
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts.get()
    }

    /// Delay between attempts
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

/// Run `action` until it succeeds or `policy` is exhausted.
///
/// Attempts run sequentially on the calling thread. The delay is slept
/// between attempts, never after the last one.
///
/// # Errors
///
/// Returns `error_factory(last_error)` when every attempt failed.
///
/// # Example
///
/// ```ignore
/// let policy = RetryPolicy::new(5, Duration::from_secs(1))?;
/// let bytes = retry(&policy, || client.fetch(name), |last| {
///     ScopeError::remote_file(format!("{name}: {last}"))
/// })?;
/// ```
pub fn retry<T, E, X>(
    policy: &RetryPolicy,
    action: impl FnMut() -> Result<T, E>,
    error_factory: impl FnOnce(E) -> X,
) -> Result<T, X>
where
    E: Display,
{
    retry_with_sleep(policy, action, error_factory, std::thread::sleep)
}

fn retry_with_sleep<T, E, X>(
    policy: &RetryPolicy,
    mut action: impl FnMut() -> Result<T, E>,
    error_factory: impl FnOnce(E) -> X,
    mut sleep: impl FnMut(Duration),
) -> Result<T, X>
where
    E: Display,
{
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match action() {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(attempt, attempts, "retried action succeeded");
                }
                return Ok(value);
            }
            Err(err) if attempt < attempts => {
                tracing::debug!(attempt, attempts, error = %err, "attempt failed, retrying");
                sleep(policy.delay());
                attempt += 1;
            }
            Err(err) => {
                tracing::warn!(attempts, error = %err, "retries exhausted");
                return Err(error_factory(err));
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO).unwrap()
    }

    mod retry_policy {
        use super::*;

        #[test]
        fn test_default() {
            let policy = RetryPolicy::default();
            assert_eq!(policy.attempts(), 5);
            assert_eq!(policy.delay(), Duration::from_secs(1));
        }

        #[test]
        fn test_zero_retries_rejected() {
            let err = RetryPolicy::new(0, Duration::ZERO).unwrap_err();
            assert!(matches!(err, ScopeError::InvalidRetryCount { retries: 0 }));
            assert!(err.is_misuse());
        }

        #[test]
        fn test_from_secs() {
            let policy = RetryPolicy::from_secs_f64(3, 2.5).unwrap();
            assert_eq!(policy.attempts(), 3);
            assert_eq!(policy.delay(), Duration::from_millis(2_500));
        }

        #[test]
        fn test_negative_delay_rejected() {
            assert!(RetryPolicy::from_secs_f64(3, -1.0).is_err());
            assert!(RetryPolicy::from_secs_f64(3, f64::NAN).is_err());
        }

        #[test]
        fn test_immediate() {
            let policy = RetryPolicy::immediate(NonZeroU32::new(2).unwrap());
            assert_eq!(policy.delay(), Duration::ZERO);
            assert_eq!(policy.with_delay(Duration::from_millis(5)).attempts(), 2);
        }
    }

    mod retry_execution {
        use super::*;

        #[test]
        fn test_always_failing_runs_every_attempt() {
            let calls = Cell::new(0);
            let result: Result<(), String> = retry(
                &policy(3),
                || {
                    calls.set(calls.get() + 1);
                    Err::<(), _>(format!("attempt {}", calls.get()))
                },
                |last| format!("wrapped: {last}"),
            );

            assert_eq!(calls.get(), 3);
            assert_eq!(result.unwrap_err(), "wrapped: attempt 3");
        }

        #[test]
        fn test_success_on_second_attempt() {
            let calls = Cell::new(0);
            let result: Result<u32, String> = retry(
                &policy(3),
                || {
                    calls.set(calls.get() + 1);
                    if calls.get() == 2 {
                        Ok(42)
                    } else {
                        Err("not yet")
                    }
                },
                |last| last.to_string(),
            );

            assert_eq!(calls.get(), 2);
            assert_eq!(result.unwrap(), 42);
        }

        #[test]
        fn test_immediate_success_does_not_sleep() {
            let sleeps = RefCell::new(Vec::new());
            let result: Result<&str, String> = retry_with_sleep(
                &RetryPolicy::new(4, Duration::from_millis(10)).unwrap(),
                || Ok::<_, String>("ok"),
                |last| last,
                |d| sleeps.borrow_mut().push(d),
            );
            assert_eq!(result.unwrap(), "ok");
            assert!(sleeps.borrow().is_empty());
        }

        #[test]
        fn test_no_sleep_after_final_attempt() {
            let sleeps = RefCell::new(Vec::new());
            let delay = Duration::from_millis(250);
            let result: Result<(), String> = retry_with_sleep(
                &RetryPolicy::new(3, delay).unwrap(),
                || Err::<(), _>("down"),
                |last| last.to_string(),
                |d| sleeps.borrow_mut().push(d),
            );
            assert!(result.is_err());
            assert_eq!(*sleeps.borrow(), vec![delay, delay]);
        }

        #[test]
        fn test_single_attempt() {
            let calls = Cell::new(0);
            let result: Result<(), ScopeError> = retry(
                &policy(1),
                || {
                    calls.set(calls.get() + 1);
                    Err::<(), _>("boom")
                },
                |last| ScopeError::remote_file(format!("file.txt: {last}")),
            );
            assert_eq!(calls.get(), 1);
            assert!(matches!(
                result.unwrap_err(),
                ScopeError::RemoteFileNotFound { .. }
            ));
        }

        #[test]
        fn test_real_sleep_is_bounded() {
            let start = std::time::Instant::now();
            let policy = RetryPolicy::new(3, Duration::from_millis(10)).unwrap();
            let _: Result<(), String> = retry(&policy, || Err::<(), _>("x"), |e| e.to_string());
            assert!(start.elapsed() >= Duration::from_millis(20));
        }
    }
}
