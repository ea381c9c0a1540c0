//! Live consumer: local handling, failure fallback and checkpointing.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{AUDIT, AUDIT_TOPIC, NAMESPACE, ORDERS, ORDERS_TOPIC, Relay, Script, settings};
use relaykit_core::message::ProcessStatus;
use relaykit_core::queue::keys;
use relaykit_relay::{ConsumeOutcome, Consumer, RelaySettings};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn consumer(relay: &Relay, settings: RelaySettings, shutdown: CancellationToken) -> Arc<Consumer> {
    Arc::new(
        Consumer::new(
            Arc::clone(&relay.pipeline),
            Arc::clone(&relay.processor),
            relay.streams(),
            Arc::new(relay.queue.clone()),
            settings,
            shutdown,
        )
        .with_clock(Arc::new(relay.clock.clone())),
    )
}

async fn wait_for_subscriber(relay: &Relay, topic: &str) {
    while relay.stream.subscriber_count(topic) == 0 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_records_are_processed_then_committed() {
    let relay = Relay::new(settings(false, false));
    let consumer = consumer(&relay, relay.settings.clone(), CancellationToken::new());
    relay.stream.feed(ORDERS_TOPIC, "first");
    relay.stream.feed(ORDERS_TOPIC, "second");

    let task = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.consume(ORDERS).await }
    });
    wait_for_subscriber(&relay, ORDERS_TOPIC).await;
    relay.stream.close();
    task.await.unwrap();

    assert_eq!(relay.handler.seen(), vec!["first", "second"]);
    assert_eq!(relay.stream.committed_offset(ORDERS_TOPIC), Some(1));
    assert!(relay.inbox.rows().is_empty());
}

#[tokio::test]
async fn test_commit_failure_does_not_stop_consumption() {
    let relay = Relay::new(settings(false, false));
    let consumer = consumer(&relay, relay.settings.clone(), CancellationToken::new());
    relay.stream.set_fail_commit(true);
    relay.stream.feed(ORDERS_TOPIC, "first");
    relay.stream.feed(ORDERS_TOPIC, "second");

    let task = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.consume(ORDERS).await }
    });
    wait_for_subscriber(&relay, ORDERS_TOPIC).await;
    relay.stream.close();
    task.await.unwrap();

    assert_eq!(relay.handler.calls(), 2);
    assert!(relay.stream.committed().is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_before_the_next_record() {
    let relay = Relay::new(settings(false, false));
    let shutdown = CancellationToken::new();
    let consumer = consumer(&relay, relay.settings.clone(), shutdown.clone());
    relay.stream.feed(ORDERS_TOPIC, "pending");

    shutdown.cancel();
    consumer.consume(ORDERS).await;

    assert_eq!(relay.handler.calls(), 0);
    assert!(relay.stream.committed().is_empty());
}

#[tokio::test]
async fn test_run_returns_once_every_topic_stops() {
    let relay = Relay::new(settings(false, false));
    let shutdown = CancellationToken::new();
    let consumer = consumer(&relay, relay.settings.clone(), shutdown.clone());

    let task = tokio::spawn(Arc::clone(&consumer).run());
    wait_for_subscriber(&relay, ORDERS_TOPIC).await;
    wait_for_subscriber(&relay, AUDIT_TOPIC).await;
    shutdown.cancel();

    task.await.unwrap();
}

#[tokio::test]
async fn test_redirected_topic_is_queued_without_processing() {
    let relay = Relay::new(settings(false, false));
    let consumer = consumer(&relay, relay.settings.clone(), CancellationToken::new());
    let record = relay.stream.feed(AUDIT_TOPIC, "audit-entry");

    let outcome = consumer.handle_record(AUDIT, &record).await;

    assert_eq!(outcome, ConsumeOutcome::Redirected);
    assert_eq!(
        relay.queue.entries(&keys::consume(NAMESPACE, AUDIT_TOPIC)),
        vec!["audit-entry"]
    );
    assert_eq!(relay.handler.calls(), 0);
}

#[tokio::test]
async fn test_save_to_db_persists_incoming_row() {
    let relay = Relay::new(settings(true, false));
    let consumer = consumer(&relay, relay.settings.clone(), CancellationToken::new());
    relay.stream.feed(ORDERS_TOPIC, "zero");
    let record = relay.stream.feed(ORDERS_TOPIC, "one");

    let outcome = consumer.handle_record(ORDERS, &record).await;

    assert_eq!(outcome, ConsumeOutcome::Persisted);
    let rows = relay.inbox.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ProcessStatus::Incoming);
    assert_eq!(rows[0].offset, 1);
    assert_eq!(rows[0].topic, ORDERS_TOPIC);
    assert_eq!(relay.handler.calls(), 0);
}

#[tokio::test]
async fn test_processing_failure_is_requeued() {
    let relay = Relay::new(settings(false, false));
    relay.handler.set(Script::Reject);
    let consumer = consumer(&relay, relay.settings.clone(), CancellationToken::new());
    let record = relay.stream.feed(ORDERS_TOPIC, "broken");

    let outcome = consumer.handle_record(ORDERS, &record).await;

    assert_eq!(outcome, ConsumeOutcome::Requeued);
    assert_eq!(
        relay.queue.entries(&keys::consume(NAMESPACE, ORDERS_TOPIC)),
        vec!["broken"]
    );
    assert!(relay.inbox.rows().is_empty());
}

#[tokio::test]
async fn test_processing_failure_with_queue_down_records_error_row() {
    let relay = Relay::new(settings(false, false));
    relay.handler.set(Script::Reject);
    relay.queue.set_fail_push(true);
    let consumer = consumer(&relay, relay.settings.clone(), CancellationToken::new());
    let record = relay.stream.feed(ORDERS_TOPIC, "broken");

    let outcome = consumer.handle_record(ORDERS, &record).await;

    assert_eq!(outcome, ConsumeOutcome::RecordedFailure);
    let rows = relay.inbox.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ProcessStatus::Initial);
    assert!(rows[0].error.as_deref().unwrap().contains("cannot apply broken"));
    assert!(rows[0].stack_trace.is_some());
}

#[tokio::test]
async fn test_redirect_failure_goes_straight_to_table() {
    let relay = Relay::new(settings(false, false));
    relay.queue.set_fail_push(true);
    let consumer = consumer(&relay, relay.settings.clone(), CancellationToken::new());
    let record = relay.stream.feed(AUDIT_TOPIC, "audit-entry");

    let outcome = consumer.handle_record(AUDIT, &record).await;

    assert_eq!(outcome, ConsumeOutcome::RecordedFailure);
    let rows = relay.inbox.with_status(ProcessStatus::Initial);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].topic, AUDIT_TOPIC);
}

#[tokio::test]
async fn test_every_fallback_failing_drops_the_record() {
    let relay = Relay::new(settings(false, false));
    relay.handler.set(Script::Reject);
    relay.queue.set_fail_push(true);
    relay.inbox.set_should_fail(true);
    let consumer = consumer(&relay, relay.settings.clone(), CancellationToken::new());
    let record = relay.stream.feed(ORDERS_TOPIC, "broken");

    assert_eq!(consumer.handle_record(ORDERS, &record).await, ConsumeOutcome::Dropped);
}
