//! Inbound relay table.

use crate::{database_error, limit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relaykit_core::message::{InboundMessage, ProcessStatus};
use relaykit_core::store::{InboxStore, StoreError};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const COLUMNS: &str = r#"id, topic, message, error, time_in, "offset", "partition", status,
    inner_message, stack_trace, time_process, time_finish"#;

/// [`InboxStore`] on the `received_message_broker` table.
#[derive(Debug, Clone)]
pub struct PostgresInbox {
    pool: PgPool,
}

impl PostgresInbox {
    /// Use `pool` for every query.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_message(row: &PgRow) -> Result<InboundMessage, StoreError> {
        let id: Uuid = row.try_get("id").map_err(|err| StoreError::CorruptRow {
            id: "unknown".to_string(),
            reason: err.to_string(),
        })?;
        let corrupt = |reason: String| StoreError::CorruptRow {
            id: id.to_string(),
            reason,
        };
        let get = |err: sqlx::Error| corrupt(err.to_string());

        let code: i16 = row.try_get("status").map_err(get)?;
        let status = ProcessStatus::from_code(code)
            .ok_or_else(|| corrupt(format!("unknown status code {code}")))?;

        Ok(InboundMessage {
            id,
            topic: row.try_get("topic").map_err(get)?,
            message: row.try_get("message").map_err(get)?,
            error: row.try_get("error").map_err(get)?,
            time_in: row.try_get("time_in").map_err(get)?,
            offset: row.try_get("offset").map_err(get)?,
            partition: row.try_get("partition").map_err(get)?,
            status,
            inner_message: row.try_get("inner_message").map_err(get)?,
            stack_trace: row.try_get("stack_trace").map_err(get)?,
            time_process: row.try_get("time_process").map_err(get)?,
            time_finish: row.try_get("time_finish").map_err(get)?,
        })
    }
}

#[async_trait]
impl InboxStore for PostgresInbox {
    async fn insert(&self, message: &InboundMessage) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO received_message_broker ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(message.id)
        .bind(&message.topic)
        .bind(&message.message)
        .bind(&message.error)
        .bind(message.time_in)
        .bind(message.offset)
        .bind(message.partition)
        .bind(message.status.code())
        .bind(&message.inner_message)
        .bind(&message.stack_trace)
        .bind(message.time_process)
        .bind(message.time_finish)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        metrics::counter!("relay_store_inbound_inserted_total", "status" => format!("{:?}", message.status))
            .increment(1);
        Ok(())
    }

    async fn list_by_status(
        &self,
        topic: &str,
        statuses: &[ProcessStatus],
        max: usize,
    ) -> Result<Vec<InboundMessage>, StoreError> {
        let codes: Vec<i16> = statuses.iter().map(|status| status.code()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM received_message_broker \
             WHERE lower(topic) = lower($1) AND status = ANY($2) \
             ORDER BY status DESC, time_in ASC \
             LIMIT $3"
        ))
        .bind(topic)
        .bind(&codes)
        .bind(limit(max))
        .fetch_all(&self.pool)
        .await
        .map_err(database_error)?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn mark_processing(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE received_message_broker
            SET status = $1, time_process = $2
            WHERE id = $3
            ",
        )
        .bind(ProcessStatus::Process.code())
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;
        Ok(())
    }

    async fn record_outcome(&self, message: &InboundMessage) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE received_message_broker
            SET status = $1, error = $2, inner_message = $3, stack_trace = $4, time_finish = $5
            WHERE id = $6
            ",
        )
        .bind(message.status.code())
        .bind(&message.error)
        .bind(&message.inner_message)
        .bind(&message.stack_trace)
        .bind(message.time_finish)
        .bind(message.id)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        if result.rows_affected() == 0 {
            tracing::warn!(id = %message.id, "Outcome recorded for a row that no longer exists");
        }
        Ok(())
    }

    async fn delete_received_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM received_message_broker WHERE time_in < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(database_error)?;

        metrics::counter!("relay_store_inbound_expired_total").increment(result.rows_affected());
        Ok(result.rows_affected())
    }
}
