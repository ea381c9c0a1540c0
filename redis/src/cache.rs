//! Response cache on Redis hashes.
//!
//! Each entry is a hash with three fields:
//!
//! | field    | value                                                  |
//! |----------|--------------------------------------------------------|
//! | `data`   | the cached bytes                                       |
//! | `sldexp` | sliding window in milliseconds, `-1` if none           |
//! | `absexp` | hard deadline as Unix milliseconds, `-1` if none       |
//!
//! The key's TTL is the earliest of the two. A hit with a sliding window pushes the
//! TTL forward, never past the hard deadline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use relaykit_core::cache::{CacheError, CacheExpiration, CacheStore};
use relaykit_core::environment::{Clock, SystemClock};
use std::sync::Arc;
use std::time::Duration;

const NOT_PRESENT: i64 = -1;

/// [`CacheStore`] on Redis with sliding and absolute expirations.
#[derive(Clone)]
pub struct RedisCache {
    conn_manager: ConnectionManager,
    clock: Arc<dyn Clock>,
}

impl RedisCache {
    /// Use an existing managed connection.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            clock: Arc::new(SystemClock),
        }
    }

    /// Evaluate relative expirations against `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

#[allow(clippy::needless_pass_by_value)]
fn backend(err: redis::RedisError) -> CacheError {
    CacheError::Backend(err.to_string())
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// TTL in milliseconds to apply on a read, or `None` to leave the key alone.
fn refreshed_ttl(sliding_ms: i64, deadline_ms: i64, now: DateTime<Utc>) -> Option<i64> {
    if sliding_ms <= 0 {
        return None;
    }
    if deadline_ms == NOT_PRESENT {
        return Some(sliding_ms);
    }
    let remaining = deadline_ms.saturating_sub(now.timestamp_millis());
    Some(sliding_ms.min(remaining))
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn_manager.clone();
        let (data, sliding, deadline): (Option<Vec<u8>>, Option<i64>, Option<i64>) =
            redis::cmd("HMGET")
                .arg(key)
                .arg("data")
                .arg("sldexp")
                .arg("absexp")
                .query_async(&mut conn)
                .await
                .map_err(backend)?;

        let Some(data) = data else {
            return Ok(None);
        };

        let now = self.clock.now();
        match refreshed_ttl(
            sliding.unwrap_or(NOT_PRESENT),
            deadline.unwrap_or(NOT_PRESENT),
            now,
        ) {
            Some(ttl) if ttl <= 0 => {
                tracing::debug!(key = %key, "Cache entry past its deadline");
                return Ok(None);
            },
            Some(ttl) => {
                let _: () = redis::cmd("PEXPIRE")
                    .arg(key)
                    .arg(ttl)
                    .query_async(&mut conn)
                    .await
                    .map_err(backend)?;
            },
            None => {},
        }

        Ok(Some(data))
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        expiration: CacheExpiration,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();
        let now = self.clock.now();

        let ttl = expiration.ttl_at(now);
        if ttl == Some(Duration::ZERO) {
            tracing::debug!(key = %key, "Not caching an already expired entry");
            let _: () = redis::cmd("DEL")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(backend)?;
            return Ok(());
        }

        let sliding = expiration.sliding.map_or(NOT_PRESENT, millis);
        let deadline = expiration
            .deadline(now)
            .map_or(NOT_PRESENT, |at| at.timestamp_millis());

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(key)
            .ignore()
            .cmd("HSET")
            .arg(key)
            .arg("data")
            .arg(value)
            .arg("sldexp")
            .arg(sliding)
            .arg("absexp")
            .arg(deadline)
            .ignore();
        if let Some(ttl) = ttl {
            pipe.cmd("PEXPIRE").arg(key).arg(millis(ttl)).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await.map_err(backend)?;

        tracing::trace!(key = %key, ttl_ms = ttl.map(millis), "Cached entry");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_entry_without_sliding_window_keeps_its_ttl() {
        assert_eq!(refreshed_ttl(NOT_PRESENT, NOT_PRESENT, now()), None);
        assert_eq!(refreshed_ttl(NOT_PRESENT, now().timestamp_millis() + 500, now()), None);
    }

    #[test]
    fn test_sliding_window_is_capped_by_deadline() {
        let deadline = now().timestamp_millis() + 2_000;

        assert_eq!(refreshed_ttl(60_000, NOT_PRESENT, now()), Some(60_000));
        assert_eq!(refreshed_ttl(60_000, deadline, now()), Some(2_000));
        assert_eq!(refreshed_ttl(1_000, deadline, now()), Some(1_000));
    }

    #[test]
    fn test_passed_deadline_yields_non_positive_ttl() {
        let deadline = now().timestamp_millis() - 1;

        assert!(refreshed_ttl(60_000, deadline, now()).is_some_and(|ttl| ttl <= 0));
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), i64::MAX);
    }
}
