//! Relational store for outbound and inbound relay messages.
//!
//! All access is predicate filter plus batch update/delete; the store provides its
//! own row-level concurrency safety.

use crate::message::{InboundMessage, OutboundMessage, ProcessStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Errors from relational store operations.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A stored value could not be mapped back to an entity
    #[error("Corrupt row {id}: {reason}")]
    CorruptRow {
        /// Row identifier
        id: String,
        /// What was wrong
        reason: String,
    },
}

/// Outbound table (`message_broker`).
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the insert fails.
    async fn insert(&self, message: &OutboundMessage) -> Result<(), StoreError>;

    /// Oldest `limit` rows with `is_sent = false`, ordered by stored date.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the query fails.
    async fn list_unsent(&self, limit: usize) -> Result<Vec<OutboundMessage>, StoreError>;

    /// Delete rows by id, returning the number deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the delete fails.
    async fn delete(&self, ids: &[Uuid]) -> Result<u64, StoreError>;

    /// Delete rows stored before `cutoff`, returning the number deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the delete fails.
    async fn delete_stored_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Inbound table (`received_message_broker`).
#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Insert a row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the insert fails.
    async fn insert(&self, message: &InboundMessage) -> Result<(), StoreError>;

    /// Up to `limit` rows for `topic` (case-insensitive) whose status is in
    /// `statuses`, ordered by status descending then `time_in` ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the query fails.
    async fn list_by_status(
        &self,
        topic: &str,
        statuses: &[ProcessStatus],
        limit: usize,
    ) -> Result<Vec<InboundMessage>, StoreError>;

    /// Move a row to `Process`, stamping `time_process`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the update fails.
    async fn mark_processing(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Persist status, error fields and `time_finish` from `message`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the update fails.
    async fn record_outcome(&self, message: &InboundMessage) -> Result<(), StoreError>;

    /// Delete rows received before `cutoff`, returning the number deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the delete fails.
    async fn delete_received_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
