use super::{Job, JobContext};
use crate::PRODUCER_DRAIN_BATCH;
use crate::producer::Producer;
use async_trait::async_trait;
use relaykit_core::store::OutboxStore;
use std::sync::Arc;

/// Re-sends unsent outbound rows to the primary stream, oldest first.
///
/// Only rows the stream accepted are deleted; the rest wait for the next run.
pub struct ProducerDbJob {
    outbox: Arc<dyn OutboxStore>,
    producer: Arc<Producer>,
}

impl ProducerDbJob {
    /// Job name in configuration.
    pub const NAME: &'static str = "ProducerDbJob";

    /// Create the job.
    #[must_use]
    pub fn new(outbox: Arc<dyn OutboxStore>, producer: Arc<Producer>) -> Self {
        Self { outbox, producer }
    }
}

#[async_trait]
impl Job for ProducerDbJob {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self, ctx: &JobContext) -> usize {
        let rows = match self.outbox.list_unsent(PRODUCER_DRAIN_BATCH).await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(error = %err, "Failed to load unsent outbound rows");
                return 0;
            }
        };

        let mut delivered = Vec::with_capacity(rows.len());
        for row in &rows {
            if ctx.cancellation.is_cancelled() {
                break;
            }
            if self.producer.send_primary_only(&row.topic, &row.message).await {
                delivered.push(row.id);
            }
        }

        if !delivered.is_empty() {
            if let Err(err) = self.outbox.delete(&delivered).await {
                // Rows stay unsent and are published again next run.
                tracing::error!(count = delivered.len(), error = %err, "Failed to delete delivered rows");
            }
        }

        tracing::info!(
            total = rows.len(),
            delivered = delivered.len(),
            "Drained unsent outbound rows"
        );
        delivered.len()
    }
}

impl std::fmt::Debug for ProducerDbJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerDbJob")
            .field("producer", &self.producer)
            .finish_non_exhaustive()
    }
}
