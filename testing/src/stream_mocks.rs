//! In-memory event stream.
//!
//! Every topic keeps a log of the records published to it. A subscriber first
//! receives the existing log, then live records, until [`InMemoryEventStream::close`]
//! ends all subscriptions. Partition is always 0; offsets count up per topic.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a panicking test

use relaykit_core::message::StreamRecord;
use relaykit_core::stream::{Checkpoint, EventStream, StreamError, Subscription};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct TopicState {
    log: Vec<StreamRecord>,
    subscribers: Vec<mpsc::UnboundedSender<StreamRecord>>,
}

/// In-memory [`EventStream`] for fast, deterministic relay tests.
///
/// # Example
///
/// ```
/// use relaykit_testing::InMemoryEventStream;
/// use relaykit_core::stream::EventStream;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let stream = InMemoryEventStream::new();
/// stream.publish("orders", b"{\"id\":1}").await?;
/// assert_eq!(stream.published_to("orders"), vec!["{\"id\":1}".to_string()]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventStream {
    topics: Arc<RwLock<HashMap<String, TopicState>>>,
    committed: Arc<RwLock<Vec<StreamRecord>>>,
    fail_publish: Arc<AtomicBool>,
    fail_subscribe: Arc<AtomicBool>,
    fail_commit: Arc<AtomicBool>,
}

impl InMemoryEventStream {
    /// Create a stream with no topics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail until switched off.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make every subscribe fail until switched off.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Make every checkpoint commit fail until switched off.
    pub fn set_fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Append a record to `topic` as if another service had published it.
    ///
    /// Ignores the publish failure switch.
    pub fn feed(&self, topic: &str, payload: impl Into<Vec<u8>>) -> StreamRecord {
        let mut topics = self.topics.write().unwrap();
        let state = topics.entry(topic.to_string()).or_default();
        let record = StreamRecord {
            topic: topic.to_string(),
            partition: 0,
            offset: i64::try_from(state.log.len()).unwrap_or(i64::MAX),
            payload: payload.into(),
        };
        state.log.push(record.clone());
        state
            .subscribers
            .retain(|subscriber| subscriber.send(record.clone()).is_ok());
        record
    }

    /// End every open subscription; their record streams finish.
    pub fn close(&self) {
        for state in self.topics.write().unwrap().values_mut() {
            state.subscribers.clear();
        }
    }

    /// Payloads published to `topic`, in order, as UTF-8.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<String> {
        self.topics
            .read()
            .unwrap()
            .get(topic)
            .map(|state| state.log.iter().map(StreamRecord::payload_str).collect())
            .unwrap_or_default()
    }

    /// Total records across all topics.
    #[must_use]
    pub fn published_count(&self) -> usize {
        self.topics
            .read()
            .unwrap()
            .values()
            .map(|state| state.log.len())
            .sum()
    }

    /// Records committed by any subscriber, in commit order.
    #[must_use]
    pub fn committed(&self) -> Vec<StreamRecord> {
        self.committed.read().unwrap().clone()
    }

    /// Highest committed offset for `topic`.
    #[must_use]
    pub fn committed_offset(&self, topic: &str) -> Option<i64> {
        self.committed
            .read()
            .unwrap()
            .iter()
            .filter(|record| record.topic == topic)
            .map(|record| record.offset)
            .max()
    }

    /// Number of live subscriptions on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .unwrap()
            .get(topic)
            .map_or(0, |state| state.subscribers.len())
    }
}

impl EventStream for InMemoryEventStream {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        let topic = topic.to_string();
        let payload = payload.to_vec();
        Box::pin(async move {
            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(StreamError::PublishFailed {
                    topic,
                    reason: "broker unavailable".to_string(),
                });
            }
            self.feed(&topic, payload);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        _group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription, StreamError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            if self.fail_subscribe.load(Ordering::SeqCst) {
                return Err(StreamError::SubscriptionFailed {
                    topic,
                    reason: "broker unavailable".to_string(),
                });
            }

            let (tx, mut rx) = mpsc::unbounded_channel();
            {
                let mut topics = self.topics.write().unwrap();
                let state = topics.entry(topic).or_default();
                for record in &state.log {
                    let _ = tx.send(record.clone());
                }
                state.subscribers.push(tx);
            }

            let records = async_stream::stream! {
                while let Some(record) = rx.recv().await {
                    yield Ok(record);
                }
            };

            Ok(Subscription {
                records: Box::pin(records),
                checkpoint: Arc::new(InMemoryCheckpoint {
                    committed: Arc::clone(&self.committed),
                    fail: Arc::clone(&self.fail_commit),
                }),
            })
        })
    }
}

/// Checkpoint handed out by [`InMemoryEventStream::subscribe`].
#[derive(Debug)]
pub struct InMemoryCheckpoint {
    committed: Arc<RwLock<Vec<StreamRecord>>>,
    fail: Arc<AtomicBool>,
}

impl Checkpoint for InMemoryCheckpoint {
    fn commit(
        &self,
        record: &StreamRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        let record = record.clone();
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StreamError::CommitFailed {
                    topic: record.topic,
                    partition: record.partition,
                    offset: record.offset,
                    reason: "group coordinator unavailable".to_string(),
                });
            }
            self.committed.write().unwrap().push(record);
            Ok(())
        })
    }
}
