//! Primary event stream abstraction.
//!
//! The stream is ordered per partition, delivers at least once and tracks progress
//! per consumer group. The relay publishes raw payloads with [`EventStream::publish`]
//! and consumes them with [`EventStream::subscribe`]. A subscriber must call
//! [`Checkpoint::commit`] once it has finished handling a record; uncommitted records
//! are redelivered after a restart.
//!
//! ```text
//!  producer ──publish──▶ ┌──────────────┐ ──records──▶ consumer task
//!                        │ event stream │                 │
//!                        └──────────────┘ ◀──commit────────┘
//! ```
//!
//! # Implementations
//!
//! - `RedpandaStream` in `relaykit-redpanda` (Kafka protocol)
//! - `InMemoryEventStream` in `relaykit-testing`

use crate::message::StreamRecord;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Errors from stream operations.
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    /// Failed to connect to the brokers
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a topic
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to commit a consumer checkpoint
    #[error("Commit failed for {topic}[{partition}]@{offset}: {reason}")]
    CommitFailed {
        /// Topic of the record
        topic: String,
        /// Partition of the record
        partition: i32,
        /// Offset of the record
        offset: i64,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error while receiving
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Records delivered to a subscriber.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<StreamRecord, StreamError>> + Send>>;

/// Commits consumer progress for a subscription.
pub trait Checkpoint: Send + Sync {
    /// Mark `record` (and everything before it in its partition) as handled.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::CommitFailed`] if the broker rejects the commit.
    fn commit(
        &self,
        record: &StreamRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>>;
}

/// An active subscription to one topic.
pub struct Subscription {
    /// Records in partition order
    pub records: RecordStream,
    /// Progress tracker for this subscription
    pub checkpoint: Arc<dyn Checkpoint>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Ordered, partitioned pub/sub connection.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the relay can hold connections as
/// `Arc<dyn EventStream>` keyed by connection name.
pub trait EventStream: Send + Sync {
    /// Publish one payload to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::PublishFailed`] if the broker does not acknowledge the
    /// message within the configured timeout.
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>>;

    /// Join `group` and subscribe to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SubscriptionFailed`] if the consumer cannot be created.
    fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription, StreamError>> + Send + '_>>;
}
