//! Bounded retry with backoff and a per-attempt timeout.

use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Errors that know whether another attempt can help.
pub trait Retryable: Sized {
    fn is_retryable(&self) -> bool;

    /// Error reported when a single attempt exceeds its timeout.
    fn attempt_timed_out(operation: &str, limit: Duration) -> Self;
}

/// Retry configuration with jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff; 1.0 keeps the delay fixed
    pub multiplier: f64,
    /// Jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,
    /// Upper bound for each attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 5_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (0-indexed), or `None`
    /// when no attempts remain.
    pub fn calculate_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts {
            return None;
        }

        let delay_ms = self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64);

        let jitter = if self.jitter_factor > 0.0 {
            rand::thread_rng().gen_range(-self.jitter_factor..=self.jitter_factor)
        } else {
            0.0
        };
        Some(Duration::from_millis((delay_ms * (1.0 + jitter)).max(0.0) as u64))
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
///
/// Each attempt is bounded by `policy.attempt_timeout`; an elapsed attempt
/// counts as a retryable failure.
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let start = Instant::now();
    let mut attempt = 0;

    loop {
        let result = match timeout(policy.attempt_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(E::attempt_timed_out(operation_name, policy.attempt_timeout)),
        };

        let err = match result {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            warn!(operation = operation_name, error = %err, "Permanent error, not retrying");
            return Err(err);
        }

        match policy.calculate_delay(attempt) {
            Some(backoff) => {
                debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient error, backing off before retry"
                );
                sleep(backoff).await;
                attempt += 1;
            }
            None => {
                warn!(
                    operation = operation_name,
                    attempts = attempt + 1,
                    error = %err,
                    "All retry attempts exhausted"
                );
                return Err(err);
            }
        }
    }
}
