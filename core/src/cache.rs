//! Distributed response cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Errors from cache operations.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The cache backend is unreachable or rejected the command
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// A cached value could not be decoded
    #[error("Cache entry '{key}' is corrupt: {reason}")]
    Corrupt {
        /// Cache key
        key: String,
        /// What was wrong
        reason: String,
    },
}

/// Expiration settings for a cache entry; each part is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheExpiration {
    /// Entry expires after this long without being read
    pub sliding: Option<Duration>,
    /// Entry expires at this instant
    pub absolute: Option<DateTime<Utc>>,
    /// Entry expires this long after it was written
    pub absolute_relative_to_now: Option<Duration>,
}

impl CacheExpiration {
    /// Sliding expiration only.
    #[must_use]
    pub const fn sliding(window: Duration) -> Self {
        Self {
            sliding: Some(window),
            absolute: None,
            absolute_relative_to_now: None,
        }
    }

    /// Relative absolute expiration only.
    #[must_use]
    pub const fn relative(ttl: Duration) -> Self {
        Self {
            sliding: None,
            absolute: None,
            absolute_relative_to_now: Some(ttl),
        }
    }

    /// The earliest hard deadline implied by `absolute` and
    /// `absolute_relative_to_now`, evaluated at `now`.
    #[must_use]
    pub fn deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let relative = self
            .absolute_relative_to_now
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| now + ttl);
        match (self.absolute, relative) {
            (Some(a), Some(r)) => Some(a.min(r)),
            (a, r) => a.or(r),
        }
    }

    /// Time-to-live to apply when writing at `now`.
    ///
    /// `None` means the entry never expires; `Some(Duration::ZERO)` means the
    /// deadline has already passed.
    #[must_use]
    pub fn ttl_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let hard = self
            .deadline(now)
            .map(|deadline| (deadline - now).to_std().unwrap_or(Duration::ZERO));
        match (hard, self.sliding) {
            (Some(h), Some(s)) => Some(h.min(s)),
            (h, s) => h.or(s),
        }
    }
}

/// Byte-oriented distributed cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read `key`, refreshing its sliding window on hit.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Write `key` with the given expirations.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the backend fails.
    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        expiration: CacheExpiration,
    ) -> Result<(), CacheError>;
}
