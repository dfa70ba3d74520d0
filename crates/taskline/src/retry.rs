//! Retry with a fixed delay.
//!
//! `max_attempts` counts the retries left after the first call:
//! `Some(0)` fails on the first error, `Some(n)` allows `n` more calls and
//! `None` retries until the operation succeeds. There is no backoff and no
//! jitter; the same delay is used between every attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Fixed-delay retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries left after the first attempt, `None` for no limit.
    pub max_attempts: Option<u32>,
    /// Pause between a failed attempt and the next one.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(10),
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: Option<u32>, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Fail on the first error.
    pub fn never() -> Self {
        Self::new(Some(0), Duration::ZERO)
    }

    /// Retry until the operation succeeds.
    pub fn unbounded(delay: Duration) -> Self {
        Self::new(None, delay)
    }

    /// Run `operation` until it succeeds or the attempts run out.
    ///
    /// On exhaustion the last error is returned unchanged.
    pub async fn run<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut remaining = self.max_attempts;
        let mut attempt: u64 = 1;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            debug!(attempt, error = %err, "Operation failed");

            match remaining {
                Some(0) => {
                    debug!(attempt, "Retry budget exhausted");
                    return Err(err);
                }
                Some(left) => {
                    debug!(attempt, remaining = left, "Retrying operation");
                    remaining = Some(left - 1);
                }
                None => debug!(attempt, "Retrying operation without limit"),
            }

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            } else {
                // A zero delay still yields to the scheduler.
                tokio::task::yield_now().await;
            }
            attempt += 1;
        }
    }
}

/// Call `operation(args)` under a fixed-delay retry policy.
///
/// `args` is cloned for every attempt.
pub async fn try_operation<F, Fut, A, T, E>(
    mut operation: F,
    args: A,
    max_attempts: Option<u32>,
    delay: Duration,
) -> Result<T, E>
where
    F: FnMut(A) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    A: Clone,
    E: Display,
{
    RetryPolicy::new(max_attempts, delay)
        .run(|| operation(args.clone()))
        .await
}
