//! Performance layer: times the inner chain and flags slow requests.

use super::to_json;
use crate::metrics::PipelineMetrics;
use relaykit_core::{PipelineError, Request, RequestContext};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Time the inner chain, warning when it exceeds `threshold`.
///
/// # Errors
///
/// Whatever the inner chain returns.
pub async fn run<R, F, Fut>(
    request: &R,
    ctx: &RequestContext,
    threshold: Duration,
    next: F,
) -> Result<R::Response, PipelineError>
where
    R: Request,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R::Response, PipelineError>>,
{
    let started = Instant::now();
    let result = next().await;
    let elapsed = started.elapsed();

    PipelineMetrics::record_duration(R::NAME, elapsed);
    if elapsed > threshold {
        tracing::warn!(
            request = R::NAME,
            elapsed_ms = elapsed.as_millis(),
            threshold_ms = threshold.as_millis(),
            user_id = ?ctx.caller.user_id,
            user_name = ?ctx.caller.user_name,
            payload = %to_json(request),
            "Long running request"
        );
    }

    result
}
