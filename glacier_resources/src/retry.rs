//! Bounded retry with an explicit backoff policy.
//!
//! ```text
//! attempt 1 ──fail──> sleep(delay(1)) ──> attempt 2 ──fail──> ... ──> attempt N ──> Exhausted
//! ```
//!
//! Only errors classified as retryable by the caller are retried; anything else
//! stops the loop immediately.

use std::{future::Future, time::Duration};

use tracing::{debug, warn};

/// Delay between two attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Always wait the same amount of time.
    Fixed(Duration),
    /// `initial * multiplier^(attempt - 1)`, capped at `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// The operation did not succeed within the policy.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Number of attempts made.
    pub attempts: u32,
    /// The last error returned by the operation.
    pub source: E,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential {
                initial,
                max,
                multiplier: 2.0,
            },
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exponent = attempt.saturating_sub(1) as i32;
                let delay = initial.as_secs_f64() * multiplier.powi(exponent);
                Duration::from_secs_f64(delay.min(max.as_secs_f64()))
            }
        }
    }
}

impl Default for RetryPolicy {
    /// Seven attempts, one second apart.
    fn default() -> Self {
        Self::fixed(7, Duration::from_secs(1))
    }
}

/// Runs `operation` until it succeeds, returns a non-retryable error, or the
/// policy is exhausted.
pub async fn retry_with_policy<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    operation_name: &'static str,
    is_retryable: R,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Debug,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if !is_retryable(&err) || attempt >= max_attempts {
                    return Err(RetryError {
                        attempts: attempt,
                        source: err,
                    });
                }

                let delay = policy.delay_after(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    ?delay,
                    err = ?err,
                    "Operation failed. Retrying."
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
