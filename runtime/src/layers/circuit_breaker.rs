//! Circuit-breaker layer.

use crate::circuit_breaker::CircuitBreakerError;
use crate::metrics::PipelineMetrics;
use crate::registry::PolicyInstances;
use relaykit_core::policy::CircuitBreakerPolicy;
use relaykit_core::{ErrorKind, PipelineError};
use std::future::Future;

/// Run the inner chain through the type's breaker.
///
/// Only failures whose kind the descriptor counts move the breaker toward opening.
///
/// # Errors
///
/// [`PipelineError::CircuitOpen`] while the breaker rejects, or whatever the inner
/// chain returns.
pub async fn run<T, F, Fut>(
    request: &'static str,
    policy: Option<&CircuitBreakerPolicy>,
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

    let breaker = instances.circuit_breaker(request, policy);
    match breaker
        .call(next, |err: &PipelineError| policy.counts(err.kind()))
        .await
    {
        Ok(result) => Ok(result),
        Err(CircuitBreakerError::Open) => {
            PipelineMetrics::record_rejection(request, ErrorKind::CircuitOpen);
            Err(PipelineError::CircuitOpen {
                request: request.to_string(),
            })
        }
        Err(CircuitBreakerError::Inner(err)) => Err(err),
    }
}
