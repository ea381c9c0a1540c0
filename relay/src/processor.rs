//! Per-topic message handling.
//!
//! Every path that processes an inbound message (the live consumer and both
//! consumer drains) goes through [`MessageProcessor`], so a topic behaves the same
//! wherever its message came from.

use async_trait::async_trait;
use relaykit_core::{PipelineError, RequestContext};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Business handling for the messages of one topic.
///
/// Handlers usually decode the payload and send one or more commands through the
/// pipeline; rate limit, bulkhead and circuit breaker rejections from those commands
/// leave the message retryable.
#[async_trait]
pub trait TopicHandler: Send + Sync {
    /// Handle one raw payload.
    ///
    /// # Errors
    ///
    /// Any [`PipelineError`]; the caller records it against the message.
    async fn handle(&self, message: &str, ctx: &RequestContext) -> Result<(), PipelineError>;
}

/// Accepts every message without doing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTopicHandler;

#[async_trait]
impl TopicHandler for NoopTopicHandler {
    async fn handle(&self, _message: &str, _ctx: &RequestContext) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Dispatches messages to their topic's handler, by logical topic name.
#[derive(Clone)]
pub struct MessageProcessor {
    handlers: HashMap<String, Arc<dyn TopicHandler>>,
    default: Arc<dyn TopicHandler>,
}

impl MessageProcessor {
    /// Processor that accepts every topic with [`NoopTopicHandler`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default: Arc::new(NoopTopicHandler),
        }
    }

    /// Route messages of the logical topic `name` to `handler`.
    #[must_use]
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn TopicHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Process one message of the logical topic `name`.
    ///
    /// # Errors
    ///
    /// Whatever the topic handler returns.
    pub async fn process(
        &self,
        name: &str,
        message: &str,
        ctx: &RequestContext,
    ) -> Result<(), PipelineError> {
        let handler = self.handlers.get(name).unwrap_or(&self.default);
        let started = Instant::now();
        tracing::debug!(topic = name, "Processing message");

        handler.handle(message, ctx).await?;

        tracing::info!(
            topic = name,
            elapsed_ms = started.elapsed().as_millis(),
            "Message processed"
        );
        Ok(())
    }
}

impl Default for MessageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageProcessor")
            .field("topics", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use relaykit_core::ErrorKind;

    struct Reject;

    #[async_trait]
    impl TopicHandler for Reject {
        async fn handle(&self, message: &str, _: &RequestContext) -> Result<(), PipelineError> {
            Err(PipelineError::BadRequest(format!("cannot decode {message}")))
        }
    }

    #[tokio::test]
    async fn test_unknown_topic_uses_noop() {
        let processor = MessageProcessor::new().with_handler("Orders", Arc::new(Reject));

        assert!(processor
            .process("Payments", "{}", &RequestContext::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_registered_handler_errors_propagate() {
        let processor = MessageProcessor::new().with_handler("Orders", Arc::new(Reject));

        let err = processor
            .process("Orders", "garbage", &RequestContext::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }
}
