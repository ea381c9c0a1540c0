//! Live consumption from the primary stream.
//!
//! One task per configured consumer topic. Each record is handled locally (queued,
//! stored or processed) and its checkpoint is committed afterwards, whatever the
//! outcome, so a record is never skipped without a trace.

use crate::RelaySettings;
use crate::commands::CreateReceivedMessageCommand;
use crate::processor::MessageProcessor;
use crate::producer::{Tier, TierOutcome};
use crate::streams::StreamRegistry;
use futures::StreamExt;
use relaykit_core::environment::{Clock, SystemClock};
use relaykit_core::message::{FailureDetails, InboundMessage, StreamRecord};
use relaykit_core::queue::{DurableQueue, keys};
use relaykit_core::{PipelineError, RequestContext};
use relaykit_runtime::Pipeline;
use relaykit_runtime::metrics::RelayMetrics;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// What happened to one consumed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Handled by the topic handler
    Processed,
    /// Stored as `Incoming` for the DB drain
    Persisted,
    /// Pushed to the inbound queue without processing
    Redirected,
    /// Failed, then pushed to the inbound queue
    Requeued,
    /// Failed, then stored with its error
    RecordedFailure,
    /// Failed and could not be kept anywhere
    Dropped,
}

impl ConsumeOutcome {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Persisted => "persisted",
            Self::Redirected => "redirected",
            Self::Requeued => "requeued",
            Self::RecordedFailure => "recorded_failure",
            Self::Dropped => "dropped",
        }
    }
}

/// Subscribes to the configured topics and handles their records.
pub struct Consumer {
    pipeline: Arc<Pipeline>,
    processor: Arc<MessageProcessor>,
    streams: StreamRegistry,
    queue: Arc<dyn DurableQueue>,
    settings: RelaySettings,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl Consumer {
    /// Create a consumer that stops when `shutdown` is cancelled.
    #[must_use]
    pub fn new(
        pipeline: Arc<Pipeline>,
        processor: Arc<MessageProcessor>,
        streams: StreamRegistry,
        queue: Arc<dyn DurableQueue>,
        settings: RelaySettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pipeline,
            processor,
            streams,
            queue,
            settings,
            clock: Arc::new(SystemClock),
            shutdown,
        }
    }

    /// Stamp rows with `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Consume every configured topic until shutdown.
    pub async fn run(self: Arc<Self>) {
        let mut tasks = JoinSet::new();
        for entry in &self.settings.messaging.consumer_topics {
            let consumer = Arc::clone(&self);
            let name = entry.name.clone();
            tasks.spawn(async move { consumer.consume(&name).await });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "Consumer task aborted");
            }
        }
        tracing::info!("All consumers stopped");
    }

    /// Consume the logical topic `name` until shutdown or the end of the stream.
    pub async fn consume(&self, name: &str) {
        let messaging = &self.settings.messaging;
        let Some(entry) = messaging.consumer_topic(name) else {
            tracing::warn!(topic = name, "Topic is not configured for consumption");
            return;
        };
        let Some(topic) = messaging.topic(&entry.connection, name) else {
            tracing::warn!(topic = name, connection = %entry.connection, "Topic is not declared on its connection");
            return;
        };
        let Some(stream) = self.streams.get(&entry.connection) else {
            tracing::warn!(topic = name, connection = %entry.connection, "No stream registered for connection");
            return;
        };

        let mut subscription = match stream.subscribe(&topic.value, &topic.group_name).await {
            Ok(subscription) => subscription,
            Err(err) => {
                tracing::error!(topic = name, error = %err, "Failed to subscribe");
                return;
            }
        };
        tracing::info!(topic = name, value = %topic.value, group = %topic.group_name, "Consumer started");

        loop {
            let next = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                next = subscription.records.next() => next,
            };
            let record = match next {
                Some(Ok(record)) => record,
                Some(Err(err)) => {
                    tracing::warn!(topic = name, error = %err, "Stream delivered an error");
                    continue;
                }
                None => break,
            };

            let outcome = self.handle_record(name, &record).await;
            RelayMetrics::record_consumed(outcome.as_str());

            if let Err(err) = subscription.checkpoint.commit(&record).await {
                tracing::warn!(topic = name, offset = record.offset, error = %err, "Checkpoint commit failed");
            }
        }
        tracing::info!(topic = name, "Consumer stopped");
    }

    /// Handle one record of the logical topic `name`.
    pub async fn handle_record(&self, name: &str, record: &StreamRecord) -> ConsumeOutcome {
        let message = record.payload_str();
        let redirected = self.settings.messaging.is_redirected(name);

        let attempt = if redirected {
            self.push_inbound(&record.topic, &message)
                .await
                .map(|()| ConsumeOutcome::Redirected)
        } else if self.settings.messaging.save_to_db {
            let row = InboundMessage::received(
                &record.topic,
                &message,
                record.partition,
                record.offset,
                self.clock.now(),
                FailureDetails::default(),
            );
            self.store(row).await.map(|()| ConsumeOutcome::Persisted)
        } else {
            self.processor
                .process(name, &message, &self.context())
                .await
                .map(|()| ConsumeOutcome::Processed)
        };

        match attempt {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(topic = name, offset = record.offset, error = %err, "Failed to handle record");
                let tiers: &[Tier] = if redirected {
                    &[Tier::Table]
                } else {
                    &[Tier::Queue, Tier::Table]
                };
                self.fall_back(tiers, record, &message, &err).await
            }
        }
    }

    async fn fall_back(
        &self,
        tiers: &[Tier],
        record: &StreamRecord,
        message: &str,
        err: &PipelineError,
    ) -> ConsumeOutcome {
        for &tier in tiers {
            let outcome = match tier {
                Tier::Queue => match self.push_inbound(&record.topic, message).await {
                    Ok(()) => TierOutcome::Delivered,
                    Err(queue_err) => {
                        tracing::warn!(topic = %record.topic, error = %queue_err, "Inbound queue push failed");
                        TierOutcome::DeferredToNextTier
                    }
                },
                Tier::Table => {
                    let row = InboundMessage::received(
                        &record.topic,
                        message,
                        record.partition,
                        record.offset,
                        self.clock.now(),
                        FailureDetails::capture(err, self.clock.now()),
                    );
                    match self.store(row).await {
                        Ok(()) => TierOutcome::Delivered,
                        Err(store_err) => {
                            tracing::error!(topic = %record.topic, offset = record.offset, payload = message, error = %store_err, "Failed record could not be stored");
                            TierOutcome::Exhausted
                        }
                    }
                }
                Tier::Stream => TierOutcome::DeferredToNextTier,
            };

            match outcome {
                TierOutcome::Delivered if tier == Tier::Queue => return ConsumeOutcome::Requeued,
                TierOutcome::Delivered => return ConsumeOutcome::RecordedFailure,
                TierOutcome::DeferredToNextTier => {}
                TierOutcome::Exhausted => break,
            }
        }
        ConsumeOutcome::Dropped
    }

    async fn push_inbound(&self, topic: &str, message: &str) -> Result<(), PipelineError> {
        let key = keys::consume(&self.settings.namespace, topic);
        self.queue
            .right_push(&key, message)
            .await
            .map_err(|err| PipelineError::Unhandled(err.into()))
    }

    async fn store(&self, message: InboundMessage) -> Result<(), PipelineError> {
        self.pipeline
            .send(&CreateReceivedMessageCommand { message }, &self.context())
            .await
    }

    fn context(&self) -> RequestContext {
        RequestContext::system(self.shutdown.child_token())
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("processor", &self.processor)
            .field("streams", &self.streams)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::ConsumeOutcome;

    #[test]
    fn test_outcome_labels_are_distinct() {
        let labels = [
            ConsumeOutcome::Processed,
            ConsumeOutcome::Persisted,
            ConsumeOutcome::Redirected,
            ConsumeOutcome::Requeued,
            ConsumeOutcome::RecordedFailure,
            ConsumeOutcome::Dropped,
        ]
        .map(ConsumeOutcome::as_str);

        let unique: std::collections::BTreeSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }
}
