//! Timeout, backoff and cancellation around remote calls.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::shutdown::CancelSignal;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Runs `call` until it succeeds, fails with a non-retryable error, or the
/// attempt ceiling is reached.
///
/// Each attempt is bounded by `timeout`; a timed out attempt counts as a
/// retryable failure. Cancellation interrupts both the call and the
/// backoff sleep. `retries` is incremented once per retry taken.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    timeout: Duration,
    cancel: &CancelSignal,
    operation: &'static str,
    retries: &mut u32,
    mut call: F,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            outcome = tokio::time::timeout(timeout, call()) => {
                outcome.unwrap_or_else(|_| Err(SyncError::Timeout))
            }
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_retryable() || attempt + 1 >= policy.max_attempts {
            return Err(err);
        }

        attempt += 1;
        *retries += 1;
        let delay = policy.delay_for_attempt(attempt);
        warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying after transient failure"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
