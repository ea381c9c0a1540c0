use super::{Job, JobContext, consumer_topic, for_each};
use crate::RelaySettings;
use crate::commands::CreateReceivedMessageCommand;
use crate::processor::MessageProcessor;
use async_trait::async_trait;
use relaykit_core::environment::{Clock, SystemClock};
use relaykit_core::message::{FailureDetails, InboundMessage, ProcessStatus};
use relaykit_core::queue::{DurableQueue, keys};
use relaykit_core::RequestContext;
use relaykit_runtime::Pipeline;
use std::sync::Arc;

/// Processes messages parked on the inbound queue of one topic.
///
/// A row is written when every message is audited (`save_to_db`) or when
/// processing failed, so failures end up in the DB drain's reach.
pub struct ConsumerQueueJob {
    pipeline: Arc<Pipeline>,
    queue: Arc<dyn DurableQueue>,
    processor: Arc<MessageProcessor>,
    settings: RelaySettings,
    clock: Arc<dyn Clock>,
}

impl ConsumerQueueJob {
    /// Job name in configuration.
    pub const NAME: &'static str = "ConsumerQueueJob";

    /// Create the job.
    #[must_use]
    pub fn new(
        pipeline: Arc<Pipeline>,
        queue: Arc<dyn DurableQueue>,
        processor: Arc<MessageProcessor>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            pipeline,
            queue,
            processor,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp rows with `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn pop_batch(&self, key: &str) -> Vec<String> {
        let limit = self.settings.messaging.message_to_process;
        let mut batch = Vec::with_capacity(limit);
        while batch.len() < limit {
            match self.queue.left_pop(key).await {
                Ok(Some(message)) => batch.push(message),
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(key, error = %err, "Inbound queue pop failed");
                    break;
                }
            }
        }
        batch
    }

    async fn attempt(
        &self,
        name: &str,
        topic: &str,
        message: String,
        ctx: &RequestContext,
    ) -> ProcessStatus {
        let started = self.clock.now();
        let result = self.processor.process(name, &message, ctx).await;
        let status = ProcessStatus::after_attempt(result.as_ref().err());

        if !self.settings.messaging.save_to_db && result.is_ok() {
            return status;
        }

        let mut row = InboundMessage::received(topic, message, 0, 0, started, FailureDetails::default());
        row.time_process = Some(started);
        row.finish_attempt(result.as_ref().err(), self.clock.now());

        if let Err(err) = self
            .pipeline
            .send(&CreateReceivedMessageCommand { message: row }, ctx)
            .await
        {
            tracing::error!(topic, status = ?status, error = %err, "Failed to record queued message outcome");
        }
        status
    }
}

#[async_trait]
impl Job for ConsumerQueueJob {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self, ctx: &JobContext) -> usize {
        let Some((entry, topic)) = consumer_topic(&self.settings.messaging, ctx, Self::NAME) else {
            return 0;
        };

        let key = keys::consume(&self.settings.namespace, &topic.value);
        let batch = self.pop_batch(&key).await;
        if batch.is_empty() {
            return 0;
        }

        let request = ctx.request_context();
        let statuses = for_each(batch, entry.parallel, |message| {
            self.attempt(&entry.name, &topic.value, message, &request)
        })
        .await;

        let failed = statuses
            .iter()
            .filter(|status| **status != ProcessStatus::Succeed)
            .count();
        tracing::info!(
            topic = %entry.name,
            total = statuses.len(),
            failed,
            "Drained inbound queue"
        );
        statuses.len()
    }
}

impl std::fmt::Debug for ConsumerQueueJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerQueueJob").finish_non_exhaustive()
    }
}
