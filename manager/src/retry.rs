//! Bounded retries with exponential backoff
//!
//! Used for channel establishment and for each teardown item. Waits between
//! attempts abort as soon as the session's [`CancelToken`] fires.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::cancel::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Fixed delay between attempts, used for teardown
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, delay, delay)
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Outcome of a retry loop that did not succeed
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// Last error seen, with the number of attempts made
    Exhausted { error: E, attempts: u32 },
    /// Error the predicate refused to retry
    Permanent(E),
    /// Cancel token fired while waiting between attempts
    Cancelled,
}

/// Run `operation` until it succeeds, fails permanently or runs out of attempts
///
/// `operation` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: RetryPolicy,
    cancel: &CancelToken,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(RetryError::Permanent(err));
                }
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Exhausted {
                        error: err,
                        attempts: attempt,
                    });
                }

                let delay = policy.delay_for(attempt);
                debug!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt, policy.max_attempts, err, delay
                );

                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                }
            }
        }
    }
}
