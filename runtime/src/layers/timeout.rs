//! Timeout layer.

use crate::metrics::PipelineMetrics;
use relaykit_core::policy::TimeoutPolicy;
use relaykit_core::{ErrorKind, PipelineError};
use std::future::Future;

/// Enforce the wall-clock budget on the inner chain.
///
/// On expiry the inner future is dropped, which cancels the in-flight call at its
/// current suspension point.
///
/// # Errors
///
/// [`PipelineError::TimedOut`] on expiry, or whatever the inner chain returns.
pub async fn run<T, F, Fut>(
    request: &'static str,
    policy: Option<&TimeoutPolicy>,
    next: F,
) -> Result<T, PipelineError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let Some(policy) = policy else {
        return next().await;
    };

    let budget = policy.duration();
    if let Ok(result) = tokio::time::timeout(budget, next()).await {
        result
    } else {
        tracing::warn!(
            request,
            budget_ms = budget.as_millis(),
            "Request exceeded its time budget and was cancelled"
        );
        PipelineMetrics::record_rejection(request, ErrorKind::TimedOut);
        Err(PipelineError::TimedOut {
            request: request.to_string(),
            budget,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn policy(ms: u64) -> TimeoutPolicy {
        TimeoutPolicy {
            enabled: true,
            duration_ms: ms,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_inner_chain_is_cancelled() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let result: Result<(), _> = run("ExportOrdersQuery", Some(&policy(100)), || async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_inner_chain_passes() {
        let result = run("ExportOrdersQuery", Some(&policy(100)), || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(5)
        })
        .await;

        assert_eq!(result.unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_times_out() {
        let result = run("ExportOrdersQuery", None, || async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .await;

        assert!(result.is_ok());
    }
}
