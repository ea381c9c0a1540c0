//! Unhandled-exception guard.
//!
//! The only place a failure is escalated to `error` level. Expected outcomes
//! (validation, not found, bad request) pass silently, cancellation and resiliency
//! rejections are logged as warnings, everything else is logged with the request
//! payload. The error is always returned unchanged.

use super::to_json;
use relaykit_core::{ErrorKind, PipelineError, Request, RequestContext};
use std::future::Future;

/// Run the inner chain and report whatever escapes it.
///
/// # Errors
///
/// Whatever the inner chain returns.
pub async fn run<R, T, F, Fut>(
    request: &R,
    ctx: &RequestContext,
    next: F,
) -> Result<T, PipelineError>
where
    R: Request,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let result = next().await;
    if let Err(err) = &result {
        report(request, ctx, err);
    }
    result
}

fn report<R: Request>(request: &R, ctx: &RequestContext, err: &PipelineError) {
    let name = R::NAME;
    match err.kind() {
        ErrorKind::Cancelled => {
            tracing::warn!(request = name, "Request was cancelled");
        }
        kind if kind.is_expected() => {
            tracing::debug!(request = name, kind = %kind, error = %err, "Request rejected");
        }
        kind if kind.is_transient_rejection() => {
            tracing::warn!(request = name, kind = %kind, error = %err, "Request rejected by resiliency policy");
        }
        kind => {
            tracing::error!(
                request = name,
                kind = %kind,
                user_id = ?ctx.caller.user_id,
                user_name = ?ctx.caller.user_name,
                payload = %to_json(request),
                error = %err,
                diagnostic = %err.diagnostic(),
                "Unhandled exception for request"
            );
        }
    }
}
