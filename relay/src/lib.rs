//! # Relaykit Relay
//!
//! Moves events between this service and the primary event stream, falling back to
//! slower tiers when the stream is unavailable and draining them back later.
//!
//! ```text
//!              ┌────────────── Producer ───────────────┐
//!  send() ───▶ │ stream ──fail──▶ queue ──fail──▶ table │
//!              └────────────────────────────────────────┘
//!
//!              ┌────────────── Consumer ───────────────┐
//!  stream ───▶ │ redirect? ──▶ queue                    │
//!              │ audit?    ──▶ table (Incoming)         │
//!              │ otherwise ──▶ topic handler            │
//!              │ failure   ──▶ queue ──fail──▶ table    │
//!              └──── commit checkpoint ─────────────────┘
//!
//!  Scheduled jobs: ConsumerDbJob, ConsumerQueueJob, ProducerDbJob,
//!                  ProducerQueueJob, RetentionJob
//! ```
//!
//! Table writes and retention deletes are relay commands executed through the
//! policy pipeline, so they get the same rate limiting, breaking and retries as any
//! other request.
//!
//! ## Wiring
//!
//! ```ignore
//! let slot = ProducerSlot::new();
//! let pipeline = Arc::new(
//!     commands::register(Pipeline::builder().configure(&config), outbox, inbox, &slot).build()?,
//! );
//! let settings = RelaySettings::from_config(&config);
//! let producer = Arc::new(Producer::new(Arc::clone(&pipeline), streams.clone(), queue.clone(), settings.clone()));
//! slot.bind(&producer);
//! ```

pub mod commands;
pub mod consumer;
pub mod jobs;
pub mod processor;
pub mod producer;
pub mod scheduler;
pub mod streams;

pub use commands::ProducerSlot;
pub use consumer::{ConsumeOutcome, Consumer};
pub use jobs::{
    ConsumerDbJob, ConsumerQueueJob, Job, JobContext, ProducerDbJob, ProducerQueueJob, RetentionJob,
};
pub use processor::{MessageProcessor, NoopTopicHandler, TopicHandler};
pub use producer::{Producer, Tier, TierOutcome};
pub use scheduler::{CronScheduler, JobInstance, JobScheduler, SchedulerError, schedule_configured};
pub use streams::StreamRegistry;

use relaykit_core::config::{AppConfig, MessagingConfig};

/// Batch size for the producer drains.
pub const PRODUCER_DRAIN_BATCH: usize = 25;

/// The slice of application configuration the relay reads.
#[derive(Debug, Clone, Default)]
pub struct RelaySettings {
    /// Prefix for durable queue keys
    pub namespace: String,
    /// Connections, topics and relay switches
    pub messaging: MessagingConfig,
    /// Days relay rows are kept
    pub changelog_days: u32,
}

impl RelaySettings {
    /// Extract the relay settings from the application configuration.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            namespace: config.app.namespace.clone(),
            messaging: config.messaging.clone(),
            changelog_days: config.data_lifetime.changelog_days,
        }
    }
}
