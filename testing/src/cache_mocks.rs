//! In-memory distributed cache.
//!
//! Expiry runs on `tokio::time`, so tests with a paused clock can step past sliding
//! windows and deadlines deterministically.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a panicking test

use async_trait::async_trait;
use chrono::Utc;
use relaykit_core::cache::{CacheError, CacheExpiration, CacheStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    sliding: Option<Duration>,
    deadline: Option<Instant>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn touch(&mut self, now: Instant) {
        if let Some(window) = self.sliding {
            let slid = now + window;
            self.expires_at = Some(self.deadline.map_or(slid, |deadline| deadline.min(slid)));
        }
    }
}

/// In-memory [`CacheStore`] honouring sliding and absolute expirations.
///
/// # Example
///
/// ```
/// use relaykit_testing::InMemoryCache;
/// use relaykit_core::cache::{CacheExpiration, CacheStore};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = InMemoryCache::new();
/// cache.set("k", b"v".to_vec(), CacheExpiration::relative(Duration::from_secs(60))).await?;
/// assert_eq!(cache.get("k").await?, Some(b"v".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until switched off.
    pub fn set_should_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Stored bytes for `key`, ignoring expiry and without refreshing it.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries
            .read()
            .unwrap()
            .get(key)
            .map(|entry| entry.value.clone())
    }

    /// Number of stored entries, expired ones included until next read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(CacheError::Backend("cache offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => {
                entry.touch(now);
                Ok(Some(entry.value.clone()))
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        expiration: CacheExpiration,
    ) -> Result<(), CacheError> {
        self.check()?;
        let now = Instant::now();
        let deadline = expiration
            .deadline(Utc::now())
            .map(|at| now + (at - Utc::now()).to_std().unwrap_or(Duration::ZERO));
        let mut entry = Entry {
            value,
            sliding: expiration.sliding,
            deadline,
            expires_at: deadline,
        };
        entry.touch(now);
        self.entries.write().unwrap().insert(key.to_string(), entry);
        Ok(())
    }
}
