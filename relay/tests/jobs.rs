//! Reconciliation drains and the inbound status machine.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use chrono::Duration;
use common::{NAMESPACE, ORDERS, ORDERS_TOPIC, Relay, Script, settings};
use relaykit_core::environment::Clock;
use relaykit_core::message::{FailureDetails, InboundMessage, OutboundMessage, ProcessStatus};
use relaykit_core::queue::keys;
use relaykit_relay::{ConsumerDbJob, ConsumerQueueJob, Job, JobContext, ProducerDbJob, RelaySettings};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn topic_context(name: &str) -> JobContext {
    JobContext::new(Some(name.to_string()), CancellationToken::new())
}

fn db_job(relay: &Relay, settings: RelaySettings) -> ConsumerDbJob {
    ConsumerDbJob::new(
        Arc::new(relay.inbox.clone()),
        Arc::clone(&relay.processor),
        settings,
    )
    .with_clock(Arc::new(relay.clock.clone()))
}

fn queue_job(relay: &Relay, settings: RelaySettings) -> ConsumerQueueJob {
    ConsumerQueueJob::new(
        Arc::clone(&relay.pipeline),
        Arc::new(relay.queue.clone()),
        Arc::clone(&relay.processor),
        settings,
    )
    .with_clock(Arc::new(relay.clock.clone()))
}

fn incoming(relay: &Relay, message: &str, age: Duration) -> InboundMessage {
    let row = InboundMessage::received(
        ORDERS_TOPIC,
        message,
        0,
        0,
        relay.clock.now() - age,
        FailureDetails::default(),
    );
    relay.inbox.seed(row.clone());
    row
}

#[tokio::test]
async fn test_db_drain_marks_rows_succeeded() {
    let relay = Relay::new(settings(true, false));
    let row = incoming(&relay, "a", Duration::minutes(5));

    let handled = db_job(&relay, relay.settings.clone()).run(&topic_context(ORDERS)).await;

    assert_eq!(handled, 1);
    let stored = relay.inbox.get(row.id).unwrap();
    assert_eq!(stored.status, ProcessStatus::Succeed);
    assert_eq!(stored.time_process, Some(relay.clock.now()));
    assert_eq!(stored.time_finish, Some(relay.clock.now()));
}

#[tokio::test]
async fn test_transient_rejection_stays_in_process_and_is_reselected() {
    let relay = Relay::new(settings(true, false));
    let row = incoming(&relay, "a", Duration::minutes(5));
    let job = db_job(&relay, relay.settings.clone());

    relay.handler.set(Script::RateLimited);
    job.run(&topic_context(ORDERS)).await;

    let stored = relay.inbox.get(row.id).unwrap();
    assert_eq!(stored.status, ProcessStatus::Process);
    assert!(stored.time_finish.is_none());
    assert!(stored.error.is_some());

    relay.handler.set(Script::Accept);
    relay.clock.advance(Duration::minutes(1));
    assert_eq!(job.run(&topic_context(ORDERS)).await, 1);

    assert_eq!(relay.inbox.get(row.id).unwrap().status, ProcessStatus::Succeed);
    assert_eq!(relay.handler.calls(), 2);
}

#[tokio::test]
async fn test_terminal_failure_is_marked_failed() {
    let relay = Relay::new(settings(true, false));
    let row = incoming(&relay, "a", Duration::minutes(5));
    relay.handler.set(Script::Reject);

    db_job(&relay, relay.settings.clone()).run(&topic_context(ORDERS)).await;

    let stored = relay.inbox.get(row.id).unwrap();
    assert_eq!(stored.status, ProcessStatus::Failed);
    assert!(stored.error.as_deref().unwrap().contains("cannot apply a"));

    // Failed rows are never picked up again.
    assert_eq!(db_job(&relay, relay.settings.clone()).run(&topic_context(ORDERS)).await, 0);
}

#[tokio::test]
async fn test_db_drain_takes_process_rows_first_then_oldest() {
    let mut settings = settings(true, false);
    settings.messaging.message_to_process = 2;
    let relay = Relay::new(settings.clone());
    incoming(&relay, "newer", Duration::minutes(1));
    incoming(&relay, "older", Duration::minutes(10));
    let mut stuck = InboundMessage::received(
        ORDERS_TOPIC,
        "stuck",
        0,
        0,
        relay.clock.now(),
        FailureDetails::default(),
    );
    stuck.status = ProcessStatus::Process;
    relay.inbox.seed(stuck);

    db_job(&relay, settings).run(&topic_context(ORDERS)).await;

    assert_eq!(relay.handler.seen(), vec!["stuck", "older"]);
}

#[tokio::test]
async fn test_parallel_db_drain_processes_whole_batch() {
    let relay = Relay::new(settings(true, true));
    for message in ["a", "b", "c"] {
        incoming(&relay, message, Duration::minutes(1));
    }

    let handled = db_job(&relay, relay.settings.clone()).run(&topic_context(ORDERS)).await;

    assert_eq!(handled, 3);
    assert_eq!(relay.inbox.with_status(ProcessStatus::Succeed).len(), 3);
}

#[tokio::test]
async fn test_unknown_topic_parameter_is_ignored() {
    let relay = Relay::new(settings(true, false));
    incoming(&relay, "a", Duration::minutes(1));

    let handled = db_job(&relay, relay.settings.clone()).run(&topic_context("Unknown")).await;

    assert_eq!(handled, 0);
    assert_eq!(relay.handler.calls(), 0);
}

#[tokio::test]
async fn test_queue_drain_persists_only_failures_by_default() {
    let relay = Relay::new(settings(false, false));
    let key = keys::consume(NAMESPACE, ORDERS_TOPIC);
    relay.queue.seed(&key, "fine");
    let job = queue_job(&relay, relay.settings.clone());

    assert_eq!(job.run(&topic_context(ORDERS)).await, 1);
    assert!(relay.inbox.rows().is_empty());

    relay.queue.seed(&key, "limited");
    relay.handler.set(Script::RateLimited);
    assert_eq!(job.run(&topic_context(ORDERS)).await, 1);

    let rows = relay.inbox.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].message, "limited");
    assert_eq!(rows[0].status, ProcessStatus::Process);
    assert_eq!((rows[0].offset, rows[0].partition), (0, 0));
    assert_eq!(relay.queue.len(&key), 0);
}

#[tokio::test]
async fn test_queue_drain_audits_successes_when_saving_to_db() {
    let relay = Relay::new(settings(true, false));
    relay.queue.seed(&keys::consume(NAMESPACE, ORDERS_TOPIC), "fine");

    queue_job(&relay, relay.settings.clone()).run(&topic_context(ORDERS)).await;

    let rows = relay.inbox.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ProcessStatus::Succeed);
    assert!(rows[0].error.is_none());
    assert!(rows[0].time_finish.is_some());
}

#[tokio::test]
async fn test_queue_drain_pops_at_most_one_batch() {
    let mut settings = settings(false, false);
    settings.messaging.message_to_process = 2;
    let relay = Relay::new(settings.clone());
    let key = keys::consume(NAMESPACE, ORDERS_TOPIC);
    for message in ["a", "b", "c"] {
        relay.queue.seed(&key, message);
    }

    assert_eq!(queue_job(&relay, settings).run(&topic_context(ORDERS)).await, 2);
    assert_eq!(relay.queue.entries(&key), vec!["c"]);
}

#[tokio::test]
async fn test_producer_db_drain_deletes_only_delivered_rows() {
    let relay = Relay::new(settings(false, false));
    let deliverable = OutboundMessage::new(ORDERS_TOPIC, "ok", relay.clock.now(), false);
    let orphan = OutboundMessage::new("unknown.v1", "lost", relay.clock.now(), false);
    relay.outbox.seed(deliverable.clone());
    relay.outbox.seed(orphan.clone());

    let job = ProducerDbJob::new(Arc::new(relay.outbox.clone()), Arc::clone(&relay.producer));
    let delivered = job.run(&JobContext::default()).await;

    assert_eq!(delivered, 1);
    assert!(!relay.outbox.contains(deliverable.id));
    assert!(relay.outbox.contains(orphan.id));
    assert_eq!(relay.stream.published_to(ORDERS_TOPIC), vec!["ok"]);
}

#[tokio::test]
async fn test_producer_db_drain_never_falls_back() {
    let relay = Relay::new(settings(false, false));
    let row = OutboundMessage::new(ORDERS_TOPIC, "ok", relay.clock.now(), false);
    relay.outbox.seed(row.clone());
    relay.stream.set_fail_publish(true);

    let job = ProducerDbJob::new(Arc::new(relay.outbox.clone()), Arc::clone(&relay.producer));

    assert_eq!(job.run(&JobContext::default()).await, 0);
    assert!(relay.outbox.contains(row.id));
    assert_eq!(relay.outbox.rows().len(), 1);
    assert!(relay.queue.is_empty());
}
