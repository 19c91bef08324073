//! Retry with exponential backoff

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Error;

/// Run `op` up to `max_attempts` times, doubling the delay between
/// attempts. Success and cancellation short-circuit; exhaustion returns
/// the last attempt's error.
pub async fn retry_with_backoff<F, Fut, T>(
    token: &CancellationToken,
    initial_delay: Duration,
    max_attempts: u32,
    mut op: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut delay = initial_delay;
    let mut last_error = Error::Cancelled;

    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                debug!(attempt, max_attempts, error = %err, "attempt failed");
                last_error = err;
            }
        }
        if attempt == max_attempts {
            break;
        }
        tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            _ = sleep(delay) => {}
        }
        delay *= 2;
    }

    Err(last_error)
}
