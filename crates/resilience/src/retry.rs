//! Retry engine with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use rand_distr::Normal;

/// Classification consulted by the retry engine.
///
/// Retryable: timeouts, transport failures, explicit retry-later
/// responses. Terminal: breaker-open, illegal state, validation errors,
/// explicit non-retry responses such as out-of-stock.
pub trait Retryable {
    /// Returns true if another attempt may succeed.
    fn is_retryable(&self) -> bool;
}

/// Exponential backoff parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Growth factor per attempt.
    pub multiplier: f64,

    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before jitter: `min(max_delay, base · multiplier^attempt)`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(raw.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before retry number `attempt` (0-based), with jitter applied.
    ///
    /// Jitter is drawn from a zero-mean Gaussian at 10% standard
    /// deviation; the result is clamped to `[0, max_delay]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // sigma 0.1 is always a valid distribution
        let normal = Normal::new(0.0, 0.1).expect("valid jitter distribution");
        let jitter: f64 = rand::thread_rng().sample(normal);
        let jittered = self.backoff_for(attempt).as_secs_f64() * (1.0 + jitter);
        Duration::from_secs_f64(jittered.clamp(0.0, self.max_delay.as_secs_f64()))
    }

    /// Runs `operation` with at most `max_retries` additional attempts.
    ///
    /// Terminal errors are surfaced immediately; retryable errors wait
    /// out the backoff delay first. Dropping the returned future aborts
    /// any pending delay, so cancelling the enclosing saga cancels its
    /// retries.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            match attempt_fn().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(operation, attempt, "operation recovered after retry");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    attempt += 1;
                    tracing::warn!(
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "operation failed, retrying after backoff"
                    );
                    metrics::counter!("retry_attempts_total").increment(1);
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    if error.is_retryable() {
                        tracing::error!(
                            operation,
                            attempts = attempt + 1,
                            error = %error,
                            "operation failed, retry budget exhausted"
                        );
                    } else {
                        tracing::debug!(
                            operation,
                            error = %error,
                            "operation failed with terminal error"
                        );
                    }
                    return Err(error);
                }
            }
        }
    }
}
