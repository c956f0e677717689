//! Retry Policy
//!
//! Exponential backoff for data-service fetches. A 4xx response or an
//! exhausted retry budget stops retrying immediately (§4.6); everything
//! else (transport errors, 5xx) gets another attempt until `max_retries`
//! is spent.
//!
//! ## Design
//!
//! Delay doubles from a 1s base and is capped at 5s so a
//! misconfigured `max_retries` can't leave an execution hanging for
//! minutes. Jitter is not applied — determinism in tests matters more
//! than thundering-herd avoidance at the scale this engine runs at.

use std::time::Duration;

use crate::error::DataServiceError;

const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(5);

/// Delay to wait before retry attempt number `attempt` (0-indexed: the
/// delay before the *second* try is `backoff_delay(0)`).
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    BASE_DELAY.saturating_mul(factor as u32).min(MAX_DELAY)
}

/// Run `attempt` repeatedly, retrying on a retryable [`DataServiceError`]
/// up to `max_retries` additional times with exponential backoff between
/// attempts.
pub async fn with_retry<F, Fut, T>(max_retries: u32, mut attempt: F) -> Result<T, DataServiceError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, DataServiceError>>,
{
    let mut tries = 0;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if tries < max_retries && err.is_retryable() => {
                tracing::warn!(attempt = tries, error = %err, "data service call failed, retrying");
                tokio::time::sleep(backoff_delay(tries)).await;
                tries += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
