//! Outbound relay table.

use crate::{database_error, limit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relaykit_core::message::OutboundMessage;
use relaykit_core::store::{OutboxStore, StoreError};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// [`OutboxStore`] on the `message_broker` table.
#[derive(Debug, Clone)]
pub struct PostgresOutbox {
    pool: PgPool,
}

impl PostgresOutbox {
    /// Use `pool` for every query.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_message(row: &PgRow) -> Result<OutboundMessage, sqlx::Error> {
        Ok(OutboundMessage {
            id: row.try_get("id")?,
            topic: row.try_get("topic")?,
            message: row.try_get("message")?,
            stored_date: row.try_get("stored_date")?,
            is_sent: row.try_get("is_send")?,
            acknowledged: row.try_get("acknowledged")?,
        })
    }
}

#[async_trait]
impl OutboxStore for PostgresOutbox {
    async fn insert(&self, message: &OutboundMessage) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO message_broker (id, topic, message, stored_date, is_send, acknowledged)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(message.id)
        .bind(&message.topic)
        .bind(&message.message)
        .bind(message.stored_date)
        .bind(message.is_sent)
        .bind(message.acknowledged)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        metrics::counter!("relay_store_outbound_inserted_total", "is_send" => message.is_sent.to_string())
            .increment(1);
        Ok(())
    }

    async fn list_unsent(&self, max: usize) -> Result<Vec<OutboundMessage>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, topic, message, stored_date, is_send, acknowledged
            FROM message_broker
            WHERE is_send = FALSE
            ORDER BY stored_date ASC
            LIMIT $1
            ",
        )
        .bind(limit(max))
        .fetch_all(&self.pool)
        .await
        .map_err(database_error)?;

        rows.iter()
            .map(|row| {
                Self::row_to_message(row).map_err(|err| StoreError::CorruptRow {
                    id: row
                        .try_get::<Uuid, _>("id")
                        .map_or_else(|_| "unknown".to_string(), |id| id.to_string()),
                    reason: err.to_string(),
                })
            })
            .collect()
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM message_broker WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(database_error)?;

        tracing::debug!(deleted = result.rows_affected(), "Deleted delivered outbound rows");
        Ok(result.rows_affected())
    }

    async fn delete_stored_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM message_broker WHERE stored_date < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(database_error)?;

        metrics::counter!("relay_store_outbound_expired_total").increment(result.rows_affected());
        Ok(result.rows_affected())
    }
}
