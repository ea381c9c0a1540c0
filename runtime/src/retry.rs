//! Retry with exponential, jittered backoff for transient failures.
//!
//! The delay before retry `n` (0-based) is drawn uniformly from
//! `[ceiling / 2, ceiling]` where `ceiling = min(base * 2^n, max_delay)`.
//!
//! # Example
//!
//! ```rust
//! use relaykit_core::policy::RetryPolicy;
//! use relaykit_runtime::retry::{Backoff, retry_with_predicate};
//!
//! # async fn example() -> Result<(), String> {
//! let backoff = Backoff::from_policy(&RetryPolicy::default());
//!
//! let result = retry_with_predicate(
//!     "GetOrderQuery",
//!     &backoff,
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("transient"),
//! )
//! .await?;
//! assert_eq!(result, 42);
//! # Ok(())
//! # }
//! ```

use crate::metrics::PipelineMetrics;
use rand::Rng;
use relaykit_core::policy::RetryPolicy;
use std::time::Duration;
use tokio::time::sleep;

/// Retry schedule derived from a [`RetryPolicy`] descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay ceiling for the first retry
    pub base_delay: Duration,
    /// Cap for any single delay
    pub max_delay: Duration,
}

impl Backoff {
    /// Build the schedule from a descriptor.
    #[must_use]
    pub const fn from_policy(policy: &RetryPolicy) -> Self {
        Self {
            max_retries: policy.retry_count,
            base_delay: policy.sleep_duration(),
            max_delay: policy.max_delay(),
        }
    }

    /// Upper bound of the delay before retry `attempt` (0-based).
    #[must_use]
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let exp_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(exp_ms.min(max_ms))
    }

    /// Jittered delay before retry `attempt` (0-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling_ms = u64::try_from(self.ceiling(attempt).as_millis()).unwrap_or(u64::MAX);
        let jittered = rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms);
        Duration::from_millis(jittered)
    }
}

/// Retry an async operation while `is_retryable` accepts the failure.
///
/// The operation runs at most `max_retries + 1` times. The last error is
/// returned once retries are exhausted; a non-retryable error is returned at once.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    request: &'static str,
    backoff: &Backoff,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(request, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::debug!(request, error = %err, "Error is not retryable");
                    return Err(err);
                }

                if attempt >= backoff.max_retries {
                    tracing::warn!(
                        request,
                        attempt,
                        error = %err,
                        "Operation failed after max retries"
                    );
                    return Err(err);
                }

                let delay = backoff.delay_for_attempt(attempt);
                tracing::warn!(
                    request,
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying..."
                );
                PipelineMetrics::record_retry(request);

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
