use super::{Job, JobContext};
use crate::RelaySettings;
use crate::commands::{DeleteReceivedMessageCommand, DeleteSendMessageCommand};
use async_trait::async_trait;
use chrono::Duration;
use relaykit_core::environment::{Clock, SystemClock};
use relaykit_runtime::Pipeline;
use std::sync::Arc;

/// Deletes relay rows older than the configured lifetime.
///
/// The inbound and outbound deletes are independent: one failing does not stop the
/// other.
pub struct RetentionJob {
    pipeline: Arc<Pipeline>,
    lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl RetentionJob {
    /// Job name in configuration.
    pub const NAME: &'static str = "RetentionJob";

    /// Create the job with `changelog_days` from `settings`.
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>, settings: &RelaySettings) -> Self {
        Self {
            pipeline,
            lifetime: Duration::days(i64::from(settings.changelog_days)),
            clock: Arc::new(SystemClock),
        }
    }

    /// Compute cutoffs with `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl Job for RetentionJob {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self, ctx: &JobContext) -> usize {
        let cutoff = self.clock.now() - self.lifetime;
        let request = ctx.request_context();

        let received = self
            .pipeline
            .send(&DeleteReceivedMessageCommand { cutoff }, &request)
            .await
            .unwrap_or_else(|err| {
                tracing::error!(%cutoff, error = %err, "Failed to delete old received messages");
                0
            });
        let sent = self
            .pipeline
            .send(&DeleteSendMessageCommand { cutoff }, &request)
            .await
            .unwrap_or_else(|err| {
                tracing::error!(%cutoff, error = %err, "Failed to delete old send messages");
                0
            });

        tracing::info!(%cutoff, received, sent, "Retention cleanup finished");
        usize::try_from(received.saturating_add(sent)).unwrap_or(usize::MAX)
    }
}

impl std::fmt::Debug for RetentionJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionJob")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}
