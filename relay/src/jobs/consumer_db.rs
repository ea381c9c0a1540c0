use super::{Job, JobContext, consumer_topic, for_each};
use crate::RelaySettings;
use crate::processor::MessageProcessor;
use async_trait::async_trait;
use relaykit_core::environment::{Clock, SystemClock};
use relaykit_core::message::{InboundMessage, ProcessStatus};
use relaykit_core::store::InboxStore;
use relaykit_core::RequestContext;
use std::sync::Arc;

/// Re-processes pending inbound rows of one topic.
///
/// Rows are picked `Process` first, then oldest first. A transient rejection leaves
/// the row in `Process` so the next run selects it again.
pub struct ConsumerDbJob {
    inbox: Arc<dyn InboxStore>,
    processor: Arc<MessageProcessor>,
    settings: RelaySettings,
    clock: Arc<dyn Clock>,
}

impl ConsumerDbJob {
    /// Job name in configuration.
    pub const NAME: &'static str = "ConsumerDbJob";

    /// Create the job.
    #[must_use]
    pub fn new(
        inbox: Arc<dyn InboxStore>,
        processor: Arc<MessageProcessor>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            inbox,
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

    async fn attempt(&self, name: &str, mut row: InboundMessage, ctx: &RequestContext) -> ProcessStatus {
        let started = self.clock.now();
        if let Err(err) = self.inbox.mark_processing(row.id, started).await {
            tracing::warn!(id = %row.id, error = %err, "Failed to claim inbound row");
            return row.status;
        }
        row.status = ProcessStatus::Process;
        row.time_process = Some(started);

        let result = self.processor.process(name, &row.message, ctx).await;
        if let Err(err) = &result {
            tracing::warn!(id = %row.id, topic = name, error = %err, "Inbound row failed");
        }
        row.finish_attempt(result.as_ref().err(), self.clock.now());

        if let Err(err) = self.inbox.record_outcome(&row).await {
            tracing::error!(id = %row.id, status = ?row.status, error = %err, "Failed to record inbound outcome");
        }
        row.status
    }
}

#[async_trait]
impl Job for ConsumerDbJob {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self, ctx: &JobContext) -> usize {
        let messaging = &self.settings.messaging;
        let Some((entry, topic)) = consumer_topic(messaging, ctx, Self::NAME) else {
            return 0;
        };

        let rows = match self
            .inbox
            .list_by_status(&topic.value, &ProcessStatus::PENDING, messaging.message_to_process)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(topic = %entry.name, error = %err, "Failed to load pending inbound rows");
                return 0;
            }
        };
        if rows.is_empty() {
            return 0;
        }

        let request = ctx.request_context();
        let statuses = for_each(rows, entry.parallel, |row| {
            self.attempt(&entry.name, row, &request)
        })
        .await;

        let succeeded = statuses
            .iter()
            .filter(|status| **status == ProcessStatus::Succeed)
            .count();
        tracing::info!(
            topic = %entry.name,
            total = statuses.len(),
            succeeded,
            "Drained inbound rows"
        );
        statuses.len()
    }
}

impl std::fmt::Debug for ConsumerDbJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerDbJob").finish_non_exhaustive()
    }
}
