//! Bounded retry for channel delivery attempts
//!
//! Channel adapters retry transient send failures with exponential backoff
//! inside their own failure boundary. The budget is deliberately small: a
//! dispatch call must finish promptly, and a channel that stays down is the
//! dispatcher's problem to count, not this helper's problem to outlast.
//! Nothing here retries a channel after its adapter has returned.

use backoff::{backoff::Backoff, ExponentialBackoff};
use std::time::Duration;
use tracing::warn;

/// Attempt budget and delay bounds for one delivery.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
        }
    }

    /// One attempt, no backoff. For channels that prefer to fail fast into
    /// the dispatcher's isolation.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.initial_delay_ms),
            max_interval: Duration::from_millis(self.max_delay_ms),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

/// Classifies whether a failed attempt is worth repeating.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

/// Run `operation` until it succeeds, a non-retryable error occurs, or the
/// attempt budget is spent. The last error is returned as-is.
pub async fn retry_with_backoff<F, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> futures::future::BoxFuture<'static, Result<T, E>>,
    E: std::fmt::Debug + IsRetryable,
{
    let budget = config.max_attempts.max(1);
    let mut backoff = config.backoff();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if attempt >= budget || !error.is_retryable() {
                    return Err(error);
                }
                let delay = backoff.next_backoff().unwrap_or_default();
                warn!(
                    attempt,
                    budget,
                    delay_ms = delay.as_millis() as u64,
                    error = ?error,
                    "delivery attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
