//! Scheduled reconciliation jobs.
//!
//! | Job | Drains |
//! |-----|--------|
//! | [`ConsumerDbJob`] | `Incoming`/`Process` inbound rows of one topic |
//! | [`ConsumerQueueJob`] | the inbound queue of one topic |
//! | [`ProducerDbJob`] | unsent outbound rows |
//! | [`ProducerQueueJob`] | the outbound queue |
//! | [`RetentionJob`] | deletes old inbound and outbound rows |
//!
//! Jobs never fail their trigger: every error is logged and the next run picks up
//! whatever is left.

mod consumer_db;
mod consumer_queue;
mod producer_db;
mod producer_queue;
mod retention;

pub use consumer_db::ConsumerDbJob;
pub use consumer_queue::ConsumerQueueJob;
pub use producer_db::ProducerDbJob;
pub use producer_queue::ProducerQueueJob;
pub use retention::RetentionJob;

use async_trait::async_trait;
use futures::future::join_all;
use relaykit_core::RequestContext;
use relaykit_core::config::{ConsumerTopicConfig, MessagingConfig, TopicConfig};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// A unit of scheduled work.
#[async_trait]
pub trait Job: Send + Sync {
    /// Name used for configuration lookup, instance names and metrics.
    fn name(&self) -> &'static str;

    /// Run once; returns how many messages or rows the run acted on.
    async fn run(&self, ctx: &JobContext) -> usize;
}

/// Inputs of one job run.
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    /// Instance parameter (the logical topic name for the consumer drains)
    pub parameter: Option<String>,
    /// Cancelled when the scheduler shuts down
    pub cancellation: CancellationToken,
}

impl JobContext {
    /// Context for one trigger.
    #[must_use]
    pub fn new(parameter: Option<String>, cancellation: CancellationToken) -> Self {
        Self {
            parameter,
            cancellation,
        }
    }

    /// Request context for the commands the run sends.
    #[must_use]
    pub fn request_context(&self) -> RequestContext {
        RequestContext::system(self.cancellation.child_token())
    }
}

/// Consumer entry and topic declaration for the logical topic in `ctx`.
fn consumer_topic<'a>(
    messaging: &'a MessagingConfig,
    ctx: &JobContext,
    job: &'static str,
) -> Option<(&'a ConsumerTopicConfig, &'a TopicConfig)> {
    let Some(name) = ctx.parameter.as_deref() else {
        tracing::warn!(job, "Job instance has no topic parameter");
        return None;
    };
    let resolved = messaging.consumer_topic(name).and_then(|entry| {
        messaging
            .topic(&entry.connection, name)
            .map(|topic| (entry, topic))
    });
    if resolved.is_none() {
        tracing::debug!(job, topic = name, "Ignoring unknown consumer topic");
    }
    resolved
}

/// Run `work` over `items` concurrently or one at a time, collecting the results.
async fn for_each<T, F, Fut>(items: Vec<T>, parallel: bool, work: F) -> Vec<Fut::Output>
where
    F: Fn(T) -> Fut,
    Fut: Future,
{
    if parallel {
        join_all(items.into_iter().map(work)).await
    } else {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            results.push(work(item).await);
        }
        results
    }
}
