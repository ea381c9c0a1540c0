//! Durable FIFO queue used as the second delivery tier.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from durable queue operations.
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// The queue backend is unreachable
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the command
    #[error("Queue command failed on '{key}': {reason}")]
    CommandFailed {
        /// Key the command targeted
        key: String,
        /// The reason for failure
        reason: String,
    },
}

/// A list per logical key supporting push-right / pop-left.
///
/// Implementations must make `left_pop` atomic so two drains never receive the same
/// entry.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Append `value` to the tail of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the value could not be stored.
    async fn right_push(&self, key: &str, value: &str) -> Result<(), QueueError>;

    /// Remove and return the head of `key`, or `None` when empty.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the backend fails.
    async fn left_pop(&self, key: &str) -> Result<Option<String>, QueueError>;
}

/// Key builders for the relay's queue entries.
pub mod keys {
    /// Sub key for messages waiting to be published.
    pub const PRODUCE_MESSAGE: &str = "ProduceMessage";
    /// Sub key for messages waiting to be consumed.
    pub const CONSUME_MESSAGE: &str = "ConsumeMessage";

    /// Key holding outbound messages that missed the stream.
    #[must_use]
    pub fn produce(namespace: &str) -> String {
        format!("{namespace}:{PRODUCE_MESSAGE}")
    }

    /// Key holding inbound messages for `topic`.
    #[must_use]
    pub fn consume(namespace: &str, topic: &str) -> String {
        format!("{namespace}:{CONSUME_MESSAGE}:{topic}")
    }
}
