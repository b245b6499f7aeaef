//! Jittered exponential backoff for handshake attempts.
//!
//! Wraps `tokio-retry2`'s `ExponentialBackoff` strategy with `jitter` applied
//! per attempt, and a `RetryError::Permanent`/`Transient` split so a
//! non-retryable failure aborts immediately instead of exhausting the
//! attempt budget.

use std::time::Duration;

use tokio_retry2::strategy::{jitter, ExponentialBackoff};
use tokio_retry2::{Retry, RetryError};

use crate::config::RealtimeClientConfig;
use crate::error::HandshakeError;

/// Runs `attempt` with jittered exponential backoff, honoring the config's
/// base delay, growth factor, cap, and attempt budget, and short-circuiting
/// without retrying when the failure is in `non_retryable_handshake_codes`.
pub async fn retry_handshake<F, Fut>(
    config: &RealtimeClientConfig,
    mut attempt: F,
) -> Result<(), HandshakeError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), HandshakeError>>,
{
    // tokio-retry2's `ExponentialBackoff` only takes an integer growth base
    // (delay_n = base^(n+1) * factor), so `retry_factor` is rounded to the
    // nearest whole step count and `retry_base_delay` supplies the millisecond
    // scale via `factor` — the crate's documented idiom for a configurable
    // starting delay (e.g. `from_millis(2).factor(1000)` for doubling from 1s).
    let growth_base = (config.retry_factor.round() as u64).max(1);
    let strategy = ExponentialBackoff::from_millis(growth_base)
        .factor((config.retry_base_delay.as_millis() as u64).max(1))
        .max_delay(config.retry_max_delay)
        .map(jitter)
        .take(config.retry_max_attempts);

    let non_retryable = config.non_retryable_handshake_codes.clone();

    Retry::spawn(strategy, move || {
        let result = attempt();
        let non_retryable = non_retryable.clone();
        async move {
            match result.await {
                Ok(()) => Ok(()),
                Err(error) => {
                    if error.is_non_retryable(&non_retryable) {
                        Err(RetryError::permanent(error))
                    } else {
                        Err(RetryError::transient(error))
                    }
                }
            }
        }
    })
    .await
    .map_err(|error| match error {
        RetryError::Transient { err, .. } => err,
        RetryError::Permanent(err) => err,
    })
}
