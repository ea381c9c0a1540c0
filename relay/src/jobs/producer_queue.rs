use super::{Job, JobContext};
use crate::producer::Producer;
use crate::{PRODUCER_DRAIN_BATCH, RelaySettings};
use async_trait::async_trait;
use relaykit_core::message::QueuedMessage;
use relaykit_core::queue::{DurableQueue, keys};
use std::sync::Arc;

/// Re-sends messages parked on the outbound queue through the full cascade.
pub struct ProducerQueueJob {
    queue: Arc<dyn DurableQueue>,
    producer: Arc<Producer>,
    namespace: String,
}

impl ProducerQueueJob {
    /// Job name in configuration.
    pub const NAME: &'static str = "ProducerQueueJob";

    /// Create the job.
    #[must_use]
    pub fn new(queue: Arc<dyn DurableQueue>, producer: Arc<Producer>, settings: &RelaySettings) -> Self {
        Self {
            queue,
            producer,
            namespace: settings.namespace.clone(),
        }
    }
}

#[async_trait]
impl Job for ProducerQueueJob {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self, ctx: &JobContext) -> usize {
        let key = keys::produce(&self.namespace);
        let mut handled = 0;
        let mut delivered = 0;

        while handled < PRODUCER_DRAIN_BATCH && !ctx.cancellation.is_cancelled() {
            let raw = match self.queue.left_pop(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(key, error = %err, "Outbound queue pop failed");
                    break;
                }
            };
            handled += 1;

            let entry: QueuedMessage = match serde_json::from_str(&raw) {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::error!(payload = %raw, error = %err, "Dropping malformed outbound queue entry");
                    continue;
                }
            };
            // A failed send parks the message again on a fallback tier.
            if self.producer.send(&entry.name, &entry.value).await {
                delivered += 1;
            }
        }

        if handled > 0 {
            tracing::info!(total = handled, delivered, "Drained outbound queue");
        }
        handled
    }
}

impl std::fmt::Debug for ProducerQueueJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerQueueJob")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
