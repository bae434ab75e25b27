use crate::core::quota::{QuotaError, QuotaResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retries an async operation with exponential backoff
///
/// # Parameters
/// - `operation`: Closure returning a future, called with the 1-based attempt number
/// - `attempts`: Total number of runs allowed
/// - `backoff`: Delay after the first failure, doubled after each further failure
///
/// # Returns
/// The successful result, the first non-retryable error as-is, or
/// `QuotaError::Unavailable` wrapping the last error once attempts run out
pub async fn with_backoff<F, Fut, T>(
    mut operation: F,
    attempts: usize,
    backoff: Duration,
) -> QuotaResult<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = QuotaResult<T>>,
{
    let attempts = attempts.max(1);
    let mut delay = backoff;
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(val) => return Ok(val),
            Err(err) if !err.is_retryable() => {
                debug!(attempt, error = %err, "Non-retryable failure");
                return Err(err);
            }
            Err(err) => {
                warn!(attempt, attempts, error = %err, "Attempt failed");
                if attempt >= attempts {
                    return Err(QuotaError::Unavailable {
                        attempts,
                        source: Box::new(err),
                    });
                }
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
        }
    }
}
