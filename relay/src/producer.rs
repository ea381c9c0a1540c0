//! Outbound delivery with tiered fallback.
//!
//! A message is offered to each [`Tier`] in turn. The driver stops at the first tier
//! that takes it; a tier that cannot take it defers to the next, and the table tier
//! is the last resort. The producer never returns an error: callers learn only
//! whether the primary stream accepted the message.

use crate::RelaySettings;
use crate::commands::CreateSendMessageCommand;
use crate::streams::StreamRegistry;
use relaykit_core::environment::{Clock, SystemClock};
use relaykit_core::message::{OutboundMessage, QueuedMessage};
use relaykit_core::queue::{DurableQueue, keys};
use relaykit_core::stream::EventStream;
use relaykit_core::RequestContext;
use relaykit_runtime::Pipeline;
use relaykit_runtime::metrics::RelayMetrics;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Delivery tiers, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Primary event stream
    Stream,
    /// Durable queue
    Queue,
    /// Relational table
    Table,
}

impl Tier {
    /// Full cascade order.
    pub const CASCADE: [Self; 3] = [Self::Stream, Self::Queue, Self::Table];

    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Queue => "queue",
            Self::Table => "table",
        }
    }
}

/// Result of offering a message to one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierOutcome {
    /// The tier took the message
    Delivered,
    /// The tier failed; try the next one
    DeferredToNextTier,
    /// The tier failed and nothing is left to try
    Exhausted,
}

/// Publishes outbound messages.
pub struct Producer {
    pipeline: Arc<Pipeline>,
    streams: StreamRegistry,
    queue: Arc<dyn DurableQueue>,
    settings: RelaySettings,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl Producer {
    /// Create a producer using the system clock.
    #[must_use]
    pub fn new(
        pipeline: Arc<Pipeline>,
        streams: StreamRegistry,
        queue: Arc<dyn DurableQueue>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            pipeline,
            streams,
            queue,
            settings,
            clock: Arc::new(SystemClock),
            shutdown: CancellationToken::new(),
        }
    }

    /// Stamp rows with `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Token cancelled when the process shuts down; table writes observe it.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Send through the full cascade.
    ///
    /// Returns `true` only when the primary stream accepted the message. `false`
    /// means delivery is pending on a slower tier, or that the message could not be
    /// stored anywhere (logged at error level).
    pub async fn send(&self, topic: &str, message: &str) -> bool {
        self.deliver(topic, message, &Tier::CASCADE).await
    }

    /// Try the primary stream only, without falling back.
    pub async fn send_primary_only(&self, topic: &str, message: &str) -> bool {
        self.deliver(topic, message, &[Tier::Stream]).await
    }

    async fn deliver(&self, topic: &str, message: &str, tiers: &[Tier]) -> bool {
        if topic.trim().is_empty() || message.is_empty() {
            tracing::warn!(topic, "Refusing to send an empty topic or message");
            return false;
        }

        let Some(stream) = self.streams.for_topic(&self.settings.messaging, topic) else {
            tracing::warn!(topic, "No stream connection serves this topic");
            return false;
        };

        for &tier in tiers {
            let outcome = match tier {
                Tier::Stream => self.publish(stream.as_ref(), topic, message).await,
                Tier::Queue => self.enqueue(topic, message).await,
                Tier::Table => self.store(topic, message).await,
            };

            match outcome {
                TierOutcome::Delivered => {
                    RelayMetrics::record_produced(tier.as_str());
                    return tier == Tier::Stream;
                }
                TierOutcome::DeferredToNextTier => {}
                TierOutcome::Exhausted => break,
            }
        }
        false
    }

    async fn publish(&self, stream: &dyn EventStream, topic: &str, message: &str) -> TierOutcome {
        let budget = self.settings.messaging.producer_send_timeout();
        match tokio::time::timeout(budget, stream.publish(topic, message.as_bytes())).await {
            Ok(Ok(())) => {
                tracing::debug!(topic, "Published to stream");
                if self.settings.messaging.save_to_db {
                    self.audit(topic, message).await;
                }
                TierOutcome::Delivered
            }
            Ok(Err(err)) => {
                tracing::warn!(topic, error = %err, "Stream publish failed, falling back to queue");
                TierOutcome::DeferredToNextTier
            }
            Err(_) => {
                tracing::warn!(topic, budget_ms = budget.as_millis(), "Stream publish timed out, falling back to queue");
                TierOutcome::DeferredToNextTier
            }
        }
    }

    async fn audit(&self, topic: &str, message: &str) {
        let command = CreateSendMessageCommand {
            message: OutboundMessage::new(topic, message, self.clock.now(), true),
        };
        if let Err(err) = self.pipeline.send(&command, &self.context()).await {
            tracing::warn!(topic, error = %err, "Failed to record sent message");
        }
    }

    async fn enqueue(&self, topic: &str, message: &str) -> TierOutcome {
        let entry = QueuedMessage {
            name: topic.to_string(),
            value: message.to_string(),
        };
        let value = match serde_json::to_string(&entry) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(topic, error = %err, "Failed to encode queue entry");
                return TierOutcome::DeferredToNextTier;
            }
        };

        match self.queue.right_push(&keys::produce(&self.settings.namespace), &value).await {
            Ok(()) => {
                tracing::info!(topic, "Message queued for later delivery");
                TierOutcome::Delivered
            }
            Err(err) => {
                tracing::warn!(topic, error = %err, "Queue push failed, falling back to table");
                TierOutcome::DeferredToNextTier
            }
        }
    }

    async fn store(&self, topic: &str, message: &str) -> TierOutcome {
        let command = CreateSendMessageCommand {
            message: OutboundMessage::new(topic, message, self.clock.now(), false),
        };
        match self.pipeline.send(&command, &self.context()).await {
            Ok(()) => {
                tracing::info!(topic, "Message stored for later delivery");
                TierOutcome::Delivered
            }
            Err(err) => {
                RelayMetrics::record_produced("lost");
                tracing::error!(topic, payload = message, error = %err, "Message could not be stored on any tier");
                TierOutcome::Exhausted
            }
        }
    }

    fn context(&self) -> RequestContext {
        RequestContext::system(self.shutdown.child_token())
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("streams", &self.streams)
            .field("namespace", &self.settings.namespace)
            .finish_non_exhaustive()
    }
}
