//! In-memory durable queue and relational stores.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a panicking test

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relaykit_core::message::{InboundMessage, OutboundMessage, ProcessStatus};
use relaykit_core::queue::{DurableQueue, QueueError};
use relaykit_core::store::{InboxStore, OutboxStore, StoreError};
use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

fn unavailable() -> StoreError {
    StoreError::DatabaseError("connection refused".to_string())
}

/// In-memory [`DurableQueue`] with one list per key.
///
/// # Example
///
/// ```
/// use relaykit_testing::InMemoryQueue;
/// use relaykit_core::queue::DurableQueue;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = InMemoryQueue::new();
/// queue.right_push("orders-api:ProduceMessage", "a").await?;
/// queue.right_push("orders-api:ProduceMessage", "b").await?;
/// assert_eq!(queue.left_pop("orders-api:ProduceMessage").await?, Some("a".to_string()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryQueue {
    lists: Arc<RwLock<HashMap<String, VecDeque<String>>>>,
    fail_push: Arc<AtomicBool>,
    fail_pop: Arc<AtomicBool>,
}

impl InMemoryQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every push fail until switched off.
    pub fn set_fail_push(&self, fail: bool) {
        self.fail_push.store(fail, Ordering::SeqCst);
    }

    /// Make every pop fail until switched off.
    pub fn set_fail_pop(&self, fail: bool) {
        self.fail_pop.store(fail, Ordering::SeqCst);
    }

    /// Push without going through the failure switch.
    pub fn seed(&self, key: &str, value: impl Into<String>) {
        self.lists
            .write()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(value.into());
    }

    /// Entries under `key`, head first.
    #[must_use]
    pub fn entries(&self, key: &str) -> Vec<String> {
        self.lists
            .read()
            .unwrap()
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of entries under `key`.
    #[must_use]
    pub fn len(&self, key: &str) -> usize {
        self.lists.read().unwrap().get(key).map_or(0, VecDeque::len)
    }

    /// Whether every list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lists.read().unwrap().values().all(VecDeque::is_empty)
    }
}

#[async_trait]
impl DurableQueue for InMemoryQueue {
    async fn right_push(&self, key: &str, value: &str) -> Result<(), QueueError> {
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("queue offline".to_string()));
        }
        self.seed(key, value);
        Ok(())
    }

    async fn left_pop(&self, key: &str) -> Result<Option<String>, QueueError> {
        if self.fail_pop.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("queue offline".to_string()));
        }
        Ok(self
            .lists
            .write()
            .unwrap()
            .get_mut(key)
            .and_then(VecDeque::pop_front))
    }
}

/// In-memory outbound table.
#[derive(Clone, Debug, Default)]
pub struct InMemoryOutbox {
    rows: Arc<RwLock<Vec<OutboundMessage>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryOutbox {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until switched off.
    pub fn set_should_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Insert without going through the failure switch.
    pub fn seed(&self, message: OutboundMessage) {
        self.rows.write().unwrap().push(message);
    }

    /// Every row in insertion order.
    #[must_use]
    pub fn rows(&self) -> Vec<OutboundMessage> {
        self.rows.read().unwrap().clone()
    }

    /// Whether a row with `id` exists.
    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.rows.read().unwrap().iter().any(|row| row.id == id)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutbox {
    async fn insert(&self, message: &OutboundMessage) -> Result<(), StoreError> {
        self.check()?;
        self.seed(message.clone());
        Ok(())
    }

    async fn list_unsent(&self, limit: usize) -> Result<Vec<OutboundMessage>, StoreError> {
        self.check()?;
        let mut unsent: Vec<_> = self
            .rows
            .read()
            .unwrap()
            .iter()
            .filter(|row| !row.is_sent)
            .cloned()
            .collect();
        unsent.sort_by_key(|row| row.stored_date);
        unsent.truncate(limit);
        Ok(unsent)
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<u64, StoreError> {
        self.check()?;
        let mut rows = self.rows.write().unwrap();
        let before = rows.len();
        rows.retain(|row| !ids.contains(&row.id));
        Ok((before - rows.len()) as u64)
    }

    async fn delete_stored_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check()?;
        let mut rows = self.rows.write().unwrap();
        let before = rows.len();
        rows.retain(|row| row.stored_date >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}

/// In-memory inbound table.
#[derive(Clone, Debug, Default)]
pub struct InMemoryInbox {
    rows: Arc<RwLock<Vec<InboundMessage>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryInbox {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until switched off.
    pub fn set_should_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Insert without going through the failure switch.
    pub fn seed(&self, message: InboundMessage) {
        self.rows.write().unwrap().push(message);
    }

    /// Every row in insertion order.
    #[must_use]
    pub fn rows(&self) -> Vec<InboundMessage> {
        self.rows.read().unwrap().clone()
    }

    /// The row with `id`.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<InboundMessage> {
        self.rows
            .read()
            .unwrap()
            .iter()
            .find(|row| row.id == id)
            .cloned()
    }

    /// Rows currently in `status`.
    #[must_use]
    pub fn with_status(&self, status: ProcessStatus) -> Vec<InboundMessage> {
        self.rows
            .read()
            .unwrap()
            .iter()
            .filter(|row| row.status == status)
            .cloned()
            .collect()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }

    fn update(&self, id: Uuid, apply: impl FnOnce(&mut InboundMessage)) {
        if let Some(row) = self.rows.write().unwrap().iter_mut().find(|row| row.id == id) {
            apply(row);
        }
    }
}

#[async_trait]
impl InboxStore for InMemoryInbox {
    async fn insert(&self, message: &InboundMessage) -> Result<(), StoreError> {
        self.check()?;
        self.seed(message.clone());
        Ok(())
    }

    async fn list_by_status(
        &self,
        topic: &str,
        statuses: &[ProcessStatus],
        limit: usize,
    ) -> Result<Vec<InboundMessage>, StoreError> {
        self.check()?;
        let mut matching: Vec<_> = self
            .rows
            .read()
            .unwrap()
            .iter()
            .filter(|row| row.topic.eq_ignore_ascii_case(topic) && statuses.contains(&row.status))
            .cloned()
            .collect();
        matching.sort_by_key(|row| (Reverse(row.status.code()), row.time_in));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn mark_processing(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check()?;
        self.update(id, |row| {
            row.status = ProcessStatus::Process;
            row.time_process = Some(at);
        });
        Ok(())
    }

    async fn record_outcome(&self, message: &InboundMessage) -> Result<(), StoreError> {
        self.check()?;
        self.update(message.id, |row| {
            row.status = message.status;
            row.error.clone_from(&message.error);
            row.inner_message.clone_from(&message.inner_message);
            row.stack_trace.clone_from(&message.stack_trace);
            row.time_finish = message.time_finish;
        });
        Ok(())
    }

    async fn delete_received_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check()?;
        let mut rows = self.rows.write().unwrap();
        let before = rows.len();
        rows.retain(|row| row.time_in >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}
