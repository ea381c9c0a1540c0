//! Redis collaborators for Relaykit.
//!
//! - [`RedisQueue`]: the relay's durable queue tier, one Redis list per key
//!   (`RPUSH` to enqueue, `LPOP` to drain)
//! - [`RedisCache`]: the pipeline's response cache, one hash per entry with the
//!   payload and its expirations
//!
//! Both hold a [`ConnectionManager`], which reconnects on its own and is cheap to
//! clone, so one connection can back the queue and the cache.
//!
//! # Example
//!
//! ```no_run
//! use relaykit_core::config::RedisConfig;
//! use relaykit_redis::{RedisCache, RedisQueue, connect};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = connect(&RedisConfig::default()).await?;
//! let queue = RedisQueue::new(manager.clone());
//! let cache = RedisCache::new(manager);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod queue;

pub use cache::RedisCache;
pub use queue::RedisQueue;

use redis::Client;
use redis::aio::ConnectionManager;
use relaykit_core::config::RedisConfig;

/// Open a managed connection to the configured server.
///
/// # Errors
///
/// Returns the client error if the URL is invalid or the server is unreachable.
pub async fn connect(config: &RedisConfig) -> Result<ConnectionManager, redis::RedisError> {
    let client = Client::open(config.url.as_str())?;
    let manager = ConnectionManager::new(client).await?;
    tracing::info!("Connected to Redis");
    Ok(manager)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let config = RedisConfig {
            url: "not-a-redis-url".to_string(),
        };

        assert!(connect(&config).await.is_err());
    }
}
