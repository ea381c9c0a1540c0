//! Retry layer.

use crate::retry::{Backoff, retry_with_predicate};
use relaykit_core::policy::RetryPolicy;
use relaykit_core::{PipelineError, RequestContext};
use std::future::Future;

/// Re-run the handler on retryable failures with jittered backoff.
///
/// Waiting between attempts stops as soon as the caller cancels.
///
/// # Errors
///
/// The last failure once retries are exhausted, the first non-retryable failure,
/// or [`PipelineError::Cancelled`].
pub async fn run<T, F, Fut>(
    request: &'static str,
    policy: Option<&RetryPolicy>,
    ctx: &RequestContext,
    mut next: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let Some(policy) = policy else {
        return next().await;
    };

    let backoff = Backoff::from_policy(policy);
    tokio::select! {
        biased;
        () = ctx.cancellation.cancelled() => {
            tracing::warn!(request, "Request cancelled during retry");
            Err(PipelineError::Cancelled { request: request.to_string() })
        }
        result = retry_with_predicate(
            request,
            &backoff,
            next,
            |err: &PipelineError| policy.retries(err.kind()),
        ) => result,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use relaykit_core::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(retry_count: u32) -> RetryPolicy {
        RetryPolicy {
            enabled: true,
            retry_count,
            sleep_duration_ms: 10,
            ..RetryPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_k_failures_then_success() {
        let calls = AtomicU32::new(0);
        let ctx = RequestContext::default();

        let result = run("GetOrderQuery", Some(&policy(3)), &ctx, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(PipelineError::unhandled("flaky"))
            } else {
                Ok("order")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "order");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_k_plus_one_failures_propagate() {
        let calls = AtomicU32::new(0);
        let ctx = RequestContext::default();

        let result: Result<(), _> = run("GetOrderQuery", Some(&policy(3)), &ctx, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::unhandled("down"))
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Unhandled);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expected_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let ctx = RequestContext::default();

        let result: Result<(), _> = run("GetOrderQuery", Some(&policy(3)), &ctx, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::NotFound("order 9".to_string()))
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_retrying() {
        let ctx = RequestContext::default();
        let token = ctx.cancellation.clone();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = run("GetOrderQuery", Some(&policy(100)), &ctx, || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                token.cancel();
            }
            Err(PipelineError::unhandled("down"))
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
        assert!(calls.load(Ordering::SeqCst) < 100);
    }
}
