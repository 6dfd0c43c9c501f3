//! Exponential backoff for remote calls.
//!
//! Only the embedding client retries; every other remote failure is surfaced
//! to the caller on the first attempt.

use std::future::Future;
use std::time::Duration;

/// Backoff schedule: `initial_delay * multiplier^(n-1)`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; zero disables retrying.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Wait before retry `n`, counting from 1.
    pub fn delay_for(&self, n: u32) -> Duration {
        let exponent = i32::try_from(n.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if secs.is_finite() {
            Duration::from_secs_f64(secs).min(self.max_delay)
        } else {
            self.max_delay
        }
    }
}

/// Outcome of [`with_retry`].
#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// The last error, and how many attempts were made in total.
    Failed { last_error: E, attempts: u32 },
}

/// Errors that may succeed when the same request is sent again.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Run `operation` until it succeeds, fails permanently, or the retry budget
/// is spent.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> RetryResult<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        let error = match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(error) => error,
        };

        if !error.is_retryable() || attempts > config.max_retries {
            return RetryResult::Failed {
                last_error: error,
                attempts,
            };
        }

        let delay = config.delay_for(attempts);
        tracing::debug!(
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "request failed, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}
