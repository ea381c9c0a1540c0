//! Integration tests for the relay tables using testcontainers.
//!
//! # Requirements
//!
//! Docker must be running. The tests start a `PostgreSQL` container and are ignored by
//! default; run them with `cargo test -p relaykit-postgres -- --ignored`.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code uses expect for clear failure messages

use chrono::{Duration, Utc};
use relaykit_core::message::{FailureDetails, InboundMessage, OutboundMessage, ProcessStatus};
use relaykit_core::store::{InboxStore, OutboxStore};
use relaykit_postgres::{PostgresInbox, PostgresOutbox, run_migrations};
use sqlx::postgres::PgPoolOptions;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Start a container and return it (to keep it alive) with both stores.
async fn setup() -> (ContainerAsync<Postgres>, PostgresOutbox, PostgresInbox) {
    let container = Postgres::default()
        .start()
        .await
        .expect("Failed to start postgres container");
    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");
    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("Failed to connect to postgres");
    run_migrations(&pool).await.expect("Failed to run migrations");
    // Running twice must be harmless.
    run_migrations(&pool).await.expect("Migrations are not idempotent");

    (container, PostgresOutbox::new(pool.clone()), PostgresInbox::new(pool))
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_unsent_rows_are_listed_oldest_first_and_deleted_by_id() {
    let (_container, outbox, _) = setup().await;
    let now = Utc::now();
    let newer = OutboundMessage::new("orders.v1", "newer", now, false);
    let older = OutboundMessage::new("orders.v1", "older", now - Duration::minutes(5), false);
    let sent = OutboundMessage::new("orders.v1", "sent", now, true);
    for row in [&newer, &older, &sent] {
        outbox.insert(row).await.expect("insert");
    }

    let unsent = outbox.list_unsent(25).await.expect("list");
    assert_eq!(
        unsent.iter().map(|row| row.message.as_str()).collect::<Vec<_>>(),
        vec!["older", "newer"]
    );

    assert_eq!(outbox.delete(&[older.id]).await.expect("delete"), 1);
    assert_eq!(outbox.list_unsent(25).await.expect("list").len(), 1);
    assert_eq!(outbox.delete(&[]).await.expect("empty delete"), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_outbound_retention_keeps_recent_rows() {
    let (_container, outbox, _) = setup().await;
    let now = Utc::now();
    outbox
        .insert(&OutboundMessage::new("orders.v1", "a", now - Duration::days(20), false))
        .await
        .unwrap();
    outbox
        .insert(&OutboundMessage::new("orders.v1", "b", now - Duration::days(1), false))
        .await
        .unwrap();

    let deleted = outbox
        .delete_stored_before(now - Duration::days(14))
        .await
        .unwrap();

    assert_eq!(deleted, 1);
    let remaining = outbox.list_unsent(25).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].message, "b");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_pending_rows_follow_status_then_arrival_order() {
    let (_container, _, inbox) = setup().await;
    let now = Utc::now();
    let older = InboundMessage::received("orders.v1", "older", 0, 1, now - Duration::minutes(10), FailureDetails::default());
    let newer = InboundMessage::received("orders.v1", "newer", 0, 2, now, FailureDetails::default());
    let mut processing = InboundMessage::received("orders.v1", "processing", 0, 3, now, FailureDetails::default());
    processing.status = ProcessStatus::Process;
    let done = {
        let mut row = InboundMessage::received("orders.v1", "done", 0, 4, now, FailureDetails::default());
        row.status = ProcessStatus::Succeed;
        row
    };
    for row in [&newer, &older, &processing, &done] {
        inbox.insert(row).await.unwrap();
    }

    let pending = inbox
        .list_by_status("ORDERS.V1", &ProcessStatus::PENDING, 25)
        .await
        .unwrap();

    assert_eq!(
        pending.iter().map(|row| row.message.as_str()).collect::<Vec<_>>(),
        vec!["processing", "older", "newer"]
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_attempt_outcome_is_persisted() {
    let (_container, _, inbox) = setup().await;
    let now = Utc::now();
    let mut row = InboundMessage::received("orders.v1", "a", 2, 7, now, FailureDetails::default());
    inbox.insert(&row).await.unwrap();

    inbox.mark_processing(row.id, now).await.unwrap();
    let claimed = inbox
        .list_by_status("orders.v1", &[ProcessStatus::Process], 1)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert!(claimed[0].time_process.is_some());

    row.status = ProcessStatus::Failed;
    row.error = Some("2025-01-01 00:00:00 | boom".to_string());
    row.time_finish = Some(now);
    inbox.record_outcome(&row).await.unwrap();

    let failed = inbox
        .list_by_status("orders.v1", &[ProcessStatus::Failed], 1)
        .await
        .unwrap();
    assert_eq!(failed[0].error.as_deref(), Some("2025-01-01 00:00:00 | boom"));
    assert_eq!((failed[0].partition, failed[0].offset), (2, 7));
    assert!(failed[0].time_finish.is_some());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_inbound_retention_compares_time_in() {
    let (_container, _, inbox) = setup().await;
    let now = Utc::now();
    inbox
        .insert(&InboundMessage::received("orders.v1", "a", 0, 0, now - Duration::days(20), FailureDetails::default()))
        .await
        .unwrap();
    inbox
        .insert(&InboundMessage::received("orders.v1", "b", 0, 1, now - Duration::days(1), FailureDetails::default()))
        .await
        .unwrap();

    assert_eq!(
        inbox.delete_received_before(now - Duration::days(14)).await.unwrap(),
        1
    );
    let remaining = inbox
        .list_by_status("orders.v1", &ProcessStatus::PENDING, 25)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].message, "b");
}
