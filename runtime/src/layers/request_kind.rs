//! Request-kind layer: commands log their payload, queries log payload and response.

use super::to_json;
use relaykit_core::{PipelineError, Request, RequestKind};
use std::future::Future;

/// Log by request kind and run the inner chain.
///
/// # Errors
///
/// [`PipelineError::Configuration`] when the request name ends in neither
/// `Command` nor `Query`, or whatever the inner chain returns.
pub async fn run<R, F, Fut>(request: &R, next: F) -> Result<R::Response, PipelineError>
where
    R: Request,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R::Response, PipelineError>>,
{
    let name = R::NAME;
    let Some(kind) = RequestKind::from_name(name) else {
        return Err(PipelineError::Configuration(format!(
            "Request type '{name}' must end in 'Command' or 'Query'"
        )));
    };

    match kind {
        RequestKind::Command => {
            tracing::info!(request = name, payload = %to_json(request), "Handling command");
            next().await
        }
        RequestKind::Query => {
            tracing::info!(request = name, payload = %to_json(request), "Handling query");
            let result = next().await;
            if let Ok(response) = &result {
                tracing::info!(request = name, response = %to_json(response), "Query answered");
            }
            result
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use relaykit_core::ErrorKind;
    use serde::Serialize;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Serialize)]
    struct OrderLookup;

    impl Request for OrderLookup {
        type Response = u32;
        const NAME: &'static str = "OrderLookup";
    }

    #[derive(Serialize)]
    struct CountOrdersQuery;

    impl Request for CountOrdersQuery {
        type Response = u32;
        const NAME: &'static str = "CountOrdersQuery";
    }

    #[tokio::test]
    async fn test_badly_named_request_is_configuration_error() {
        let invoked = AtomicBool::new(false);

        let result = run(&OrderLookup, || async {
            invoked.store(true, Ordering::SeqCst);
            Ok(1)
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Configuration);
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_query_runs_inner_chain() {
        let result = run(&CountOrdersQuery, || async { Ok(12) }).await;
        assert_eq!(result.unwrap(), 12);
    }
}
