//! Retry with exponential backoff for order hand-off

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// No delay between attempts; for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

/// Decides whether a failed attempt is worth repeating and how long to wait.
pub trait RetryPolicy<E>: Send + Sync {
    fn should_retry(&self, attempt: u32, error: &E) -> bool;
    fn delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff that retries only errors the classifier accepts.
pub struct ExponentialBackoff<F> {
    config: RetryConfig,
    is_transient: F,
}

impl<F> ExponentialBackoff<F> {
    pub fn new(config: RetryConfig, is_transient: F) -> Self {
        Self {
            config,
            is_transient,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl<E, F> RetryPolicy<E> for ExponentialBackoff<F>
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn should_retry(&self, attempt: u32, error: &E) -> bool {
        attempt < self.config.max_attempts && (self.is_transient)(error)
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay.as_millis() as f64;
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let exponential_delay = base_delay * self.config.backoff_multiplier.powi(exponent);

        let mut delay = Duration::from_millis(exponential_delay as u64);

        if delay > self.config.max_delay {
            delay = self.config.max_delay;
        }

        if self.config.jitter && !delay.is_zero() {
            // up to 25% extra
            let jitter = (delay.as_millis() as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay += Duration::from_millis(jitter);
        }

        delay
    }
}

/// Retry an async operation with a given policy
pub async fn retry_async_with_policy<T, E, F, Fut>(
    mut operation: F,
    policy: &dyn RetryPolicy<E>,
    operation_name: &str,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if policy.should_retry(attempt, &err) {
                    let delay = policy.delay(attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying async operation after delay"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    return Err(err);
                }
            }
        }
    }
}
