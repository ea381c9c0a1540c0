//! Kafka-protocol stream connection for Relaykit.
//!
//! [`RedpandaStream`] implements [`EventStream`] with rdkafka. It works against
//! Redpanda, Apache Kafka or any broker that speaks the Kafka protocol.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - Auto-commit is disabled for every subscription
//! - A record's offset is committed only when the relay calls
//!   [`Checkpoint::commit`] after handling it
//! - Uncommitted records are redelivered to the group after a restart
//! - Ordering holds within a partition
//!
//! # Example
//!
//! ```no_run
//! use relaykit_core::stream::EventStream;
//! use relaykit_redpanda::RedpandaStream;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = RedpandaStream::new("localhost:9092")?;
//! stream.publish("orders.v1", br#"{"id":1}"#).await?;
//!
//! let mut subscription = stream.subscribe("orders.v1", "billing").await?;
//! while let Some(record) = subscription.records.next().await {
//!     let record = record?;
//!     println!("{}", record.payload_str());
//!     subscription.checkpoint.commit(&record).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use relaykit_core::config::StreamConnectionConfig;
use relaykit_core::message::StreamRecord;
use relaykit_core::stream::{Checkpoint, EventStream, StreamError, Subscription};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Stream connection backed by rdkafka.
///
/// One producer is shared by every publish call. Each subscription creates its own
/// consumer in the requested group.
///
/// # Example
///
/// ```no_run
/// use relaykit_redpanda::RedpandaStream;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let stream = RedpandaStream::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaStream {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaStream {
    /// Connect with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, StreamError> {
        Self::builder().brokers(brokers).build()
    }

    /// Connect to a configured connection, acknowledging publishes within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConnectionFailed`] if the producer cannot be created.
    pub fn from_config(
        connection: &StreamConnectionConfig,
        timeout: Duration,
    ) -> Result<Self, StreamError> {
        tracing::info!(
            connection = %connection.name,
            brokers = %connection.brokers,
            "Connecting stream"
        );
        Self::builder()
            .brokers(connection.brokers.clone())
            .timeout(timeout)
            .build()
    }

    /// Start configuring a connection.
    #[must_use]
    pub fn builder() -> RedpandaStreamBuilder {
        RedpandaStreamBuilder::default()
    }

    /// Bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn consumer(&self, group: &str) -> Result<StreamConsumer, rdkafka::error::KafkaError> {
        ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .create()
    }
}

impl std::fmt::Debug for RedpandaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaStream")
            .field("brokers", &self.brokers)
            .field("timeout", &self.timeout)
            .field("buffer_size", &self.buffer_size)
            .field("auto_offset_reset", &self.auto_offset_reset)
            .finish_non_exhaustive()
    }
}

impl EventStream for RedpandaStream {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        let topic = topic.to_string();
        let payload = payload.to_vec();

        Box::pin(async move {
            let record = FutureRecord::<(), [u8]>::to(&topic).payload(&payload);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(topic = %topic, partition, offset, "Published record");
                    Ok(())
                },
                Err((err, _)) => Err(StreamError::PublishFailed {
                    topic,
                    reason: err.to_string(),
                }),
            }
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription, StreamError>> + Send + '_>> {
        let topic = topic.to_string();
        let group = group.to_string();

        Box::pin(async move {
            let subscription_failed = |reason: String| StreamError::SubscriptionFailed {
                topic: topic.clone(),
                reason,
            };

            let consumer = Arc::new(
                self.consumer(&group)
                    .map_err(|err| subscription_failed(err.to_string()))?,
            );
            consumer
                .subscribe(&[topic.as_str()])
                .map_err(|err| subscription_failed(err.to_string()))?;

            tracing::info!(topic = %topic, group = %group, "Subscribed");

            let (tx, mut rx) = tokio::sync::mpsc::channel(self.buffer_size);
            let reader = Arc::clone(&consumer);
            tokio::spawn(async move {
                loop {
                    let received = tokio::select! {
                        () = tx.closed() => break,
                        received = reader.recv() => received,
                    };
                    let item = match received {
                        Ok(message) => Ok(StreamRecord {
                            topic: message.topic().to_string(),
                            partition: message.partition(),
                            offset: message.offset(),
                            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                        }),
                        Err(err) => Err(StreamError::TransportError(err.to_string())),
                    };
                    if tx.send(item).await.is_err() {
                        tracing::debug!("Subscription dropped, stopping reader");
                        break;
                    }
                }
            });

            let records = async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };

            Ok(Subscription {
                records: Box::pin(records),
                checkpoint: Arc::new(RedpandaCheckpoint { consumer }),
            })
        })
    }
}

/// Commits offsets for one subscription's consumer.
struct RedpandaCheckpoint {
    consumer: Arc<StreamConsumer>,
}

impl Checkpoint for RedpandaCheckpoint {
    fn commit(
        &self,
        record: &StreamRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        let topic = record.topic.clone();
        let partition = record.partition;
        let offset = record.offset;

        Box::pin(async move {
            let commit_failed = |reason: String| StreamError::CommitFailed {
                topic: topic.clone(),
                partition,
                offset,
                reason,
            };

            // Kafka commits the position of the next record to read.
            let mut positions = TopicPartitionList::new();
            positions
                .add_partition_offset(&topic, partition, Offset::Offset(offset.saturating_add(1)))
                .map_err(|err| commit_failed(err.to_string()))?;

            self.consumer
                .commit(&positions, CommitMode::Async)
                .map_err(|err| commit_failed(err.to_string()))
        })
    }
}

/// Builder for [`RedpandaStream`].
#[derive(Default)]
pub struct RedpandaStreamBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaStreamBuilder {
    /// Comma-separated bootstrap servers (required).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgement mode: `"0"`, `"1"` or `"all"` (default `"all"`).
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"` or `"zstd"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// How long a publish waits for the broker acknowledgement (default 5 s).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Records buffered per subscription before the reader waits (default 1000).
    #[must_use]
    pub const fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Where a new group starts reading: `"earliest"` or `"latest"` (default `"earliest"`).
    #[must_use]
    pub fn auto_offset_reset(mut self, reset: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(reset.into());
        self
    }

    /// Create the producer.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConnectionFailed`] if no brokers were set or rdkafka
    /// rejects the configuration.
    pub fn build(self) -> Result<RedpandaStream, StreamError> {
        let brokers = self
            .brokers
            .filter(|brokers| !brokers.trim().is_empty())
            .ok_or_else(|| StreamError::ConnectionFailed("brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let timeout_ms = timeout.as_millis().to_string();

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", &timeout_ms)
            .set("acks", self.producer_acks.as_deref().unwrap_or("all"));
        if let Some(compression) = &self.compression {
            config.set("compression.type", compression);
        }

        let producer: FutureProducer = config
            .create()
            .map_err(|err| StreamError::ConnectionFailed(err.to_string()))?;

        Ok(RedpandaStream {
            producer,
            brokers,
            timeout,
            buffer_size: self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE).max(1),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        })
    }
}
