//! Durable queue on Redis lists.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use relaykit_core::queue::{DurableQueue, QueueError};

/// [`DurableQueue`] where each key is a Redis list.
///
/// `LPOP` is atomic on the server, so concurrent drains never see the same entry.
#[derive(Clone)]
pub struct RedisQueue {
    conn_manager: ConnectionManager,
}

impl RedisQueue {
    /// Use an existing managed connection.
    #[must_use]
    pub const fn new(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }

    /// Connect to `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] if the server cannot be reached.
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::Unavailable(format!("Failed to create Redis client: {e}")))?;
        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            QueueError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
        })?;
        Ok(Self { conn_manager })
    }
}

impl std::fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueue").finish_non_exhaustive()
    }
}

fn command_failed(key: &str, err: &redis::RedisError) -> QueueError {
    if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
        QueueError::Unavailable(err.to_string())
    } else {
        QueueError::CommandFailed {
            key: key.to_string(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl DurableQueue for RedisQueue {
    async fn right_push(&self, key: &str, value: &str) -> Result<(), QueueError> {
        let mut conn = self.conn_manager.clone();
        let length: i64 = conn
            .rpush(key, value)
            .await
            .map_err(|e| command_failed(key, &e))?;

        metrics::counter!("relay_queue_pushed_total").increment(1);
        tracing::debug!(key = %key, length, "Queued entry");
        Ok(())
    }

    async fn left_pop(&self, key: &str) -> Result<Option<String>, QueueError> {
        let mut conn = self.conn_manager.clone();
        let value: Option<String> = conn
            .lpop(key, None)
            .await
            .map_err(|e| command_failed(key, &e))?;

        if value.is_some() {
            metrics::counter!("relay_queue_popped_total").increment(1);
        }
        Ok(value)
    }
}
