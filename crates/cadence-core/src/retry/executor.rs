//! Retry executor: run an async operation under a [`RetryPolicy`].

use std::fmt::Display;
use std::future::Future;

use tracing::{debug, warn};

use super::policy::RetryPolicy;

/// Stateless, reusable; one instance can serve any number of concurrent calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor;

impl RetryExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run `operation` up to `policy.max_retries + 1` times.
    ///
    /// The closure receives the 0-indexed attempt number. A failure is
    /// returned as-is when it is the last attempt or the policy predicate
    /// rejects it; otherwise the executor sleeps `policy.delay(attempt)` and
    /// tries again.
    pub async fn with_retry<T, E, F, Fut>(
        &self,
        policy: &RetryPolicy<E>,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt: u32 = 0;
        loop {
            let err = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !policy.should_retry(&err) {
                debug!(attempt, error = %err, "error is not retryable");
                return Err(err);
            }
            if attempt >= policy.max_retries {
                warn!(attempts = attempt + 1, error = %err, "retries exhausted");
                return Err(err);
            }

            let delay = policy.delay(attempt);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retry scheduled"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Shorthand for `RetryExecutor.with_retry(policy, operation)`.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy<E>, operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    RetryExecutor.with_retry(policy, operation).await
}
