//! Fallback layer.

use crate::metrics::PipelineMetrics;
use relaykit_core::request::FallbackHandler;
use relaykit_core::{ErrorKind, PipelineError, Request, RequestContext};
use std::future::Future;

/// Run the inner chain, handing any failure to the type's fallback handler.
///
/// Cancellation is never masked by a fallback.
///
/// # Errors
///
/// The original failure when no fallback is registered, or the fallback's own
/// failure.
pub async fn run<R, F, Fut>(
    request: &R,
    ctx: &RequestContext,
    fallback: Option<&dyn FallbackHandler<R>>,
    next: F,
) -> Result<R::Response, PipelineError>
where
    R: Request,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R::Response, PipelineError>>,
{
    let err = match next().await {
        Ok(response) => return Ok(response),
        Err(err) => err,
    };

    match fallback {
        Some(handler) if err.kind() != ErrorKind::Cancelled => {
            tracing::warn!(request = R::NAME, error = %err, "Request failed, invoking fallback");
            PipelineMetrics::record_fallback(R::NAME);
            handler.handle(request, &err, ctx).await
        }
        _ => Err(err),
    }
}
