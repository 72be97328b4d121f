//! Bounded exponential-backoff retry.
//!
//! Wraps any fallible async action (in practice one generation call) in an
//! attempt loop:
//! - Attempt 1 runs immediately.
//! - Between attempt `k` and `k + 1` the loop sleeps
//!   `min(initial_backoff * 2^(k-1), max_backoff)`: 1s, 2s, 4s, 5s, 5s, ...
//! - The last attempt's error is returned unchanged, so its kind survives.
//! - Errors that are not [retryable](AnalysisError::is_retryable) end the
//!   loop at once.
//! - Cancelling the token cuts a backoff sleep short with
//!   [`AnalysisError::Cancelled`]; no further attempt starts.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{AnalysisError, Result};

/// Attempt budget and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Run `action` until it succeeds, the attempt budget is spent, or `cancel`
/// fires during a backoff.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut action: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err: AnalysisError = match action().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if attempt >= max_attempts || !err.is_retryable() {
            return Err(err);
        }

        let delay = policy.delay_after(attempt);
        tracing::warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "generation attempt failed: {}",
            err
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(AnalysisError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
