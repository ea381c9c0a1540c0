//! Relay commands executed through the pipeline.
//!
//! | Command | Effect |
//! |---------|--------|
//! | [`ProduceMessageCommand`] | Send through the producer cascade |
//! | [`CreateSendMessageCommand`] | Insert an outbound row |
//! | [`CreateReceivedMessageCommand`] | Insert an inbound row |
//! | [`DeleteSendMessageCommand`] | Delete outbound rows stored before a cutoff |
//! | [`DeleteReceivedMessageCommand`] | Delete inbound rows received before a cutoff |

use crate::producer::Producer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relaykit_core::message::{InboundMessage, OutboundMessage};
use relaykit_core::store::{InboxStore, OutboxStore, StoreError};
use relaykit_core::{PipelineError, Request, RequestContext, RequestHandler};
use relaykit_runtime::PipelineBuilder;
use serde::Serialize;
use std::sync::{Arc, OnceLock, Weak};

fn store_failure(err: StoreError) -> PipelineError {
    PipelineError::Unhandled(err.into())
}

/// Emit `message` on `topic`; responds whether the primary stream took it.
#[derive(Debug, Clone, Serialize)]
pub struct ProduceMessageCommand {
    /// Physical topic name
    pub topic: String,
    /// Payload
    pub message: String,
}

impl Request for ProduceMessageCommand {
    type Response = bool;
    const NAME: &'static str = "ProduceMessageCommand";
}

/// Persist an outbound row.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSendMessageCommand {
    /// Row to insert
    pub message: OutboundMessage,
}

impl Request for CreateSendMessageCommand {
    type Response = ();
    const NAME: &'static str = "CreateSendMessageCommand";
}

/// Persist an inbound row.
#[derive(Debug, Clone, Serialize)]
pub struct CreateReceivedMessageCommand {
    /// Row to insert
    pub message: InboundMessage,
}

impl Request for CreateReceivedMessageCommand {
    type Response = ();
    const NAME: &'static str = "CreateReceivedMessageCommand";
}

/// Delete outbound rows stored before `cutoff`; responds with the count.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DeleteSendMessageCommand {
    /// Rows with an older `stored_date` are deleted
    pub cutoff: DateTime<Utc>,
}

impl Request for DeleteSendMessageCommand {
    type Response = u64;
    const NAME: &'static str = "DeleteSendMessageCommand";
}

/// Delete inbound rows received before `cutoff`; responds with the count.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DeleteReceivedMessageCommand {
    /// Rows with an older `time_in` are deleted
    pub cutoff: DateTime<Utc>,
}

impl Request for DeleteReceivedMessageCommand {
    type Response = u64;
    const NAME: &'static str = "DeleteReceivedMessageCommand";
}

/// Late-bound reference to the producer.
///
/// The producer sends its own table writes through the pipeline, and the pipeline
/// hands [`ProduceMessageCommand`] to the producer. The slot breaks that cycle: the
/// handler is registered before the pipeline is built and the producer is bound
/// afterwards. Only a weak reference is kept.
#[derive(Debug, Clone, Default)]
pub struct ProducerSlot(Arc<OnceLock<Weak<Producer>>>);

impl ProducerSlot {
    /// Create an unbound slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `producer`; returns `false` if the slot was already bound.
    pub fn bind(&self, producer: &Arc<Producer>) -> bool {
        self.0.set(Arc::downgrade(producer)).is_ok()
    }

    fn get(&self) -> Option<Arc<Producer>> {
        self.0.get().and_then(Weak::upgrade)
    }
}

/// Handles [`ProduceMessageCommand`].
#[derive(Debug, Clone)]
pub struct ProduceMessageHandler {
    producer: ProducerSlot,
}

#[async_trait]
impl RequestHandler<ProduceMessageCommand> for ProduceMessageHandler {
    async fn handle(
        &self,
        request: &ProduceMessageCommand,
        _ctx: &RequestContext,
    ) -> Result<bool, PipelineError> {
        let producer = self.producer.get().ok_or_else(|| {
            PipelineError::Configuration("No producer is bound to the relay".to_string())
        })?;
        Ok(producer.send(&request.topic, &request.message).await)
    }
}

/// Handles [`CreateSendMessageCommand`] and [`DeleteSendMessageCommand`].
#[derive(Clone)]
pub struct OutboxHandler {
    outbox: Arc<dyn OutboxStore>,
}

#[async_trait]
impl RequestHandler<CreateSendMessageCommand> for OutboxHandler {
    async fn handle(
        &self,
        request: &CreateSendMessageCommand,
        _ctx: &RequestContext,
    ) -> Result<(), PipelineError> {
        self.outbox
            .insert(&request.message)
            .await
            .map_err(store_failure)?;
        tracing::debug!(topic = %request.message.topic, is_sent = request.message.is_sent, "Saved send message");
        Ok(())
    }
}

#[async_trait]
impl RequestHandler<DeleteSendMessageCommand> for OutboxHandler {
    async fn handle(
        &self,
        request: &DeleteSendMessageCommand,
        _ctx: &RequestContext,
    ) -> Result<u64, PipelineError> {
        let deleted = self
            .outbox
            .delete_stored_before(request.cutoff)
            .await
            .map_err(store_failure)?;
        tracing::debug!(deleted, cutoff = %request.cutoff, "Deleted send messages");
        Ok(deleted)
    }
}

/// Handles [`CreateReceivedMessageCommand`] and [`DeleteReceivedMessageCommand`].
#[derive(Clone)]
pub struct InboxHandler {
    inbox: Arc<dyn InboxStore>,
}

#[async_trait]
impl RequestHandler<CreateReceivedMessageCommand> for InboxHandler {
    async fn handle(
        &self,
        request: &CreateReceivedMessageCommand,
        _ctx: &RequestContext,
    ) -> Result<(), PipelineError> {
        self.inbox
            .insert(&request.message)
            .await
            .map_err(store_failure)?;
        tracing::debug!(topic = %request.message.topic, status = ?request.message.status, "Saved received message");
        Ok(())
    }
}

#[async_trait]
impl RequestHandler<DeleteReceivedMessageCommand> for InboxHandler {
    async fn handle(
        &self,
        request: &DeleteReceivedMessageCommand,
        _ctx: &RequestContext,
    ) -> Result<u64, PipelineError> {
        let deleted = self
            .inbox
            .delete_received_before(request.cutoff)
            .await
            .map_err(store_failure)?;
        tracing::debug!(deleted, cutoff = %request.cutoff, "Deleted received messages");
        Ok(deleted)
    }
}

/// Register the handlers for every relay command.
#[must_use]
pub fn register(
    builder: PipelineBuilder,
    outbox: Arc<dyn OutboxStore>,
    inbox: Arc<dyn InboxStore>,
    producer: &ProducerSlot,
) -> PipelineBuilder {
    let outbox = Arc::new(OutboxHandler { outbox });
    let inbox = Arc::new(InboxHandler { inbox });
    builder
        .handler::<ProduceMessageCommand>(Arc::new(ProduceMessageHandler {
            producer: producer.clone(),
        }))
        .handler::<CreateSendMessageCommand>(Arc::clone(&outbox) as _)
        .handler::<DeleteSendMessageCommand>(outbox)
        .handler::<CreateReceivedMessageCommand>(Arc::clone(&inbox) as _)
        .handler::<DeleteReceivedMessageCommand>(inbox)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use relaykit_core::ErrorKind;
    use relaykit_core::environment::Clock;
    use relaykit_runtime::Pipeline;
    use relaykit_testing::{InMemoryInbox, InMemoryOutbox, test_clock};

    fn pipeline(outbox: &InMemoryOutbox, inbox: &InMemoryInbox) -> Pipeline {
        register(
            Pipeline::builder(),
            Arc::new(outbox.clone()),
            Arc::new(inbox.clone()),
            &ProducerSlot::new(),
        )
        .build()
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_send_message_inserts_row() {
        let (outbox, inbox) = (InMemoryOutbox::new(), InMemoryInbox::new());
        let pipeline = pipeline(&outbox, &inbox);
        let message = OutboundMessage::new("orders.v1", "{}", test_clock().now(), false);

        pipeline
            .send(
                &CreateSendMessageCommand {
                    message: message.clone(),
                },
                &RequestContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(outbox.rows(), vec![message]);
    }

    #[tokio::test]
    async fn test_store_failure_is_unhandled() {
        let (outbox, inbox) = (InMemoryOutbox::new(), InMemoryInbox::new());
        outbox.set_should_fail(true);
        let pipeline = pipeline(&outbox, &inbox);

        let err = pipeline
            .send(
                &DeleteSendMessageCommand {
                    cutoff: test_clock().now() - Duration::days(14),
                },
                &RequestContext::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unhandled);
    }

    #[tokio::test]
    async fn test_produce_without_bound_producer_is_configuration_error() {
        let (outbox, inbox) = (InMemoryOutbox::new(), InMemoryInbox::new());
        let pipeline = pipeline(&outbox, &inbox);

        let err = pipeline
            .send(
                &ProduceMessageCommand {
                    topic: "orders.v1".to_string(),
                    message: "{}".to_string(),
                },
                &RequestContext::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
