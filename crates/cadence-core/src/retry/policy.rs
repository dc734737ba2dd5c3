//! Retry policy: how many attempts, how long to wait, which errors qualify.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::CadenceError;

type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Retry configuration. Pure data, no lifecycle.
///
/// `max_retries` counts *re*-tries: an operation runs at most
/// `max_retries + 1` times.
pub struct RetryPolicy<E = CadenceError> {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub use_exponential_backoff: bool,
    retry_predicate: Predicate<E>,
}

impl<E> RetryPolicy<E> {
    /// Exponential policy that retries every error.
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            use_exponential_backoff: true,
            retry_predicate: Arc::new(|_| true),
        }
    }

    /// Wait `initial_delay` between every attempt.
    pub fn fixed(mut self) -> Self {
        self.use_exponential_backoff = false;
        self
    }

    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_predicate = Arc::new(predicate);
        self
    }

    pub fn should_retry(&self, error: &E) -> bool {
        (self.retry_predicate)(error)
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-indexed).
    ///
    /// - fixed: `initial_delay`
    /// - exponential: `min(initial_delay * 2^attempt, max_delay)`
    ///
    /// Example with initial=1s, max=10s: 1s, 2s, 4s, 8s, 10s, 10s, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.initial_delay;
        }
        2u32.checked_pow(attempt)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl RetryPolicy<CadenceError> {
    /// Service re-binding: 5 retries, 1s doubling up to 16s. Everything except
    /// credential problems is retried.
    pub fn service_binding() -> Self {
        Self::new(5, Duration::from_millis(1000), Duration::from_millis(16_000))
            .with_predicate(|e: &CadenceError| !e.is_auth_failure())
    }

    /// Network/API calls: only transient errors are retried.
    pub fn transient_only(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self::new(max_retries, initial_delay, max_delay).with_predicate(CadenceError::is_retryable)
    }
}

impl Default for RetryPolicy<CadenceError> {
    /// 3 retries, 1s doubling up to 10s, transient errors only.
    fn default() -> Self {
        Self::transient_only(3, Duration::from_secs(1), Duration::from_secs(10))
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            use_exponential_backoff: self.use_exponential_backoff,
            retry_predicate: Arc::clone(&self.retry_predicate),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("use_exponential_backoff", &self.use_exponential_backoff)
            .finish_non_exhaustive()
    }
}
