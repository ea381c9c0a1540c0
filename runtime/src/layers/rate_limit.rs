//! Rate-limit layer.

use crate::metrics::PipelineMetrics;
use crate::registry::PolicyInstances;
use relaykit_core::policy::RateLimitPolicy;
use relaykit_core::{ErrorKind, PipelineError};
use std::future::Future;

/// Reject with [`PipelineError::RateLimited`] when the type's bucket is empty.
///
/// # Errors
///
/// The rejection, or whatever the inner chain returns.
pub async fn run<T, F, Fut>(
    request: &'static str,
    policy: Option<&RateLimitPolicy>,
    instances: &PolicyInstances,
    next: F,
) -> Result<T, PipelineError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let Some(policy) = policy else {
        return next().await;
    };

    let limiter = instances.rate_limiter(request, policy);
    if let Err(retry_after) = limiter.try_acquire().await {
        tracing::warn!(
            request,
            retry_after_ms = retry_after.as_millis(),
            "Rate limit exceeded, rejecting request"
        );
        PipelineMetrics::record_rejection(request, ErrorKind::RateLimited);
        return Err(PipelineError::RateLimited {
            request: request.to_string(),
            retry_after,
        });
    }

    next().await
}
