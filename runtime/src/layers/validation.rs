//! Validation layer.

use futures::future::join_all;
use relaykit_core::request::Validator;
use relaykit_core::{PipelineError, Request, RequestContext, ValidationErrors};
use std::future::Future;
use std::sync::Arc;

/// Run every validator for the request; any failure stops the chain.
///
/// # Errors
///
/// [`PipelineError::Validation`] carrying every field failure, or whatever the
/// inner chain returns.
pub async fn run<R, F, Fut>(
    request: &R,
    ctx: &RequestContext,
    validators: &[Arc<dyn Validator<R>>],
    next: F,
) -> Result<R::Response, PipelineError>
where
    R: Request,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R::Response, PipelineError>>,
{
    if validators.is_empty() {
        return next().await;
    }

    let failures = join_all(validators.iter().map(|v| v.validate(request, ctx))).await;
    let errors: ValidationErrors = failures
        .into_iter()
        .flatten()
        .map(|failure| (failure.field, failure.message))
        .collect();

    if !errors.is_empty() {
        tracing::warn!(request = R::NAME, failures = %errors, "Request failed validation");
        return Err(PipelineError::Validation(errors));
    }

    next().await
}
