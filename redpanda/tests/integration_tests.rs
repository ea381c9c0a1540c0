//! Broker tests for [`RedpandaStream`] against a Kafka container.
//!
//! Ignored by default because they need Docker and take a while to start Kafka:
//!
//! ```bash
//! cargo test -p relaykit-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use futures::StreamExt;
use relaykit_core::message::StreamRecord;
use relaykit_core::stream::{EventStream, Subscription};
use relaykit_redpanda::RedpandaStream;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");
    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

/// Publish until the broker accepts, which also auto-creates the topic.
async fn warm_up(stream: &RedpandaStream, topic: &str) {
    for _ in 0..60 {
        if stream.publish(topic, b"warmup").await.is_ok() {
            tokio::time::sleep(Duration::from_secs(2)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    panic!("Kafka did not accept a publish to {topic}");
}

async fn next_records(subscription: &mut Subscription, count: usize) -> Vec<StreamRecord> {
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(15), async {
        while received.len() < count {
            let Some(record) = subscription.records.next().await else {
                break;
            };
            let record = record.expect("Failed to receive record");
            if record.payload != b"warmup" {
                received.push(record);
            }
        }
    })
    .await
    .expect("Timeout waiting for records");
    received
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_published_payloads_arrive_in_partition_order() {
    let (_kafka, brokers) = start_kafka().await;
    let stream = RedpandaStream::new(&brokers).expect("stream");
    warm_up(&stream, "orders.v1").await;

    for payload in ["first", "second", "third"] {
        stream
            .publish("orders.v1", payload.as_bytes())
            .await
            .expect("publish");
    }

    let mut subscription = stream.subscribe("orders.v1", "order-test").await.expect("subscribe");
    let received = next_records(&mut subscription, 3).await;

    let payloads: Vec<String> = received.iter().map(StreamRecord::payload_str).collect();
    assert_eq!(payloads, vec!["first", "second", "third"]);
    assert!(received.windows(2).all(|pair| pair[0].offset < pair[1].offset));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_uncommitted_records_are_redelivered_to_the_group() {
    let (_kafka, brokers) = start_kafka().await;
    let stream = RedpandaStream::new(&brokers).expect("stream");
    warm_up(&stream, "audit.v1").await;
    stream.publish("audit.v1", b"one").await.expect("publish");
    stream.publish("audit.v1", b"two").await.expect("publish");

    {
        let mut first = stream.subscribe("audit.v1", "redelivery").await.expect("subscribe");
        let received = next_records(&mut first, 2).await;
        // Only the first record is checkpointed.
        first.checkpoint.commit(&received[0]).await.expect("commit");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let mut second = stream.subscribe("audit.v1", "redelivery").await.expect("subscribe");
    let redelivered = next_records(&mut second, 1).await;

    assert_eq!(redelivered[0].payload_str(), "two");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_publish_to_unreachable_broker_times_out() {
    let stream = RedpandaStream::builder()
        .brokers("127.0.0.1:1")
        .timeout(Duration::from_millis(500))
        .build()
        .expect("producer creation does not connect");

    let result = stream.publish("orders.v1", b"lost").await;

    assert!(result.is_err());
}
