//! Bulkhead layer.

use crate::bulkhead::BulkheadError;
use crate::metrics::PipelineMetrics;
use crate::registry::PolicyInstances;
use relaykit_core::policy::BulkheadPolicy;
use relaykit_core::{ErrorKind, PipelineError, RequestContext};
use std::future::Future;

/// Run the inner chain inside the type's bulkhead.
///
/// # Errors
///
/// [`PipelineError::BulkheadRejected`] when slots and queue are full,
/// [`PipelineError::Cancelled`] when the caller cancels while queued, or whatever
/// the inner chain returns.
pub async fn run<T, F, Fut>(
    request: &'static str,
    policy: Option<&BulkheadPolicy>,
    instances: &PolicyInstances,
    ctx: &RequestContext,
    next: F,
) -> Result<T, PipelineError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let Some(policy) = policy else {
        return next().await;
    };

    let bulkhead = instances.bulkhead(request, policy);
    match bulkhead.execute(&ctx.cancellation, next()).await {
        Ok(result) => result,
        Err(BulkheadError::Full) => {
            tracing::warn!(
                request,
                max_parallelization = policy.max_parallelization,
                max_queuing_actions = policy.max_queuing_actions,
                "Bulkhead full, rejecting request"
            );
            PipelineMetrics::record_rejection(request, ErrorKind::BulkheadRejected);
            Err(PipelineError::BulkheadRejected {
                request: request.to_string(),
            })
        }
        Err(BulkheadError::Cancelled) => {
            tracing::warn!(request, "Request cancelled while waiting for bulkhead slot");
            Err(PipelineError::Cancelled {
                request: request.to_string(),
            })
        }
    }
}
