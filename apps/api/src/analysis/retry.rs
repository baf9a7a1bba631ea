//! Bounded retry with exponential backoff around a single backend invocation.
//!
//! Only `Timeout` and `Process` failures are retried. Parse failures are treated
//! as deterministic: the same request would produce the same unusable answer.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::backends::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for each one after.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failure of zero-based `attempt`: base × 2^attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(1u32 << attempt.min(31))
    }
}

/// Runs `attempt_fn` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` is used up. `attempt_fn` receives the one-based attempt number.
///
/// Cancellation aborts both an in-flight attempt (its future is dropped) and a
/// backoff sleep, yielding `BackendError::Cancelled`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt_fn: F,
) -> Result<T, BackendError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            result = attempt_fn(attempt) => result,
        };

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            return Err(BackendError::Exhausted {
                attempts: attempt,
                last: Box::new(error),
            });
        }

        let delay = policy.backoff_delay(attempt - 1);
        warn!(
            "Attempt {attempt}/{max_attempts} failed: {error}. Retrying after {}ms...",
            delay.as_millis()
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BackendError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
