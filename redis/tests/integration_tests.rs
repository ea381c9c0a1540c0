//! Queue and cache tests against a Redis container.
//!
//! Ignored by default; run with `cargo test -p relaykit-redis -- --ignored`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use relaykit_core::cache::{CacheExpiration, CacheStore};
use relaykit_core::config::RedisConfig;
use relaykit_core::queue::{DurableQueue, keys};
use relaykit_redis::{RedisCache, RedisQueue, connect};
use std::time::Duration;
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::{REDIS_PORT, Redis};

async fn setup() -> (ContainerAsync<Redis>, RedisQueue, RedisCache) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");
    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(REDIS_PORT)
        .await
        .expect("Failed to get port");
    let config = RedisConfig {
        url: format!("redis://{host}:{port}"),
    };
    let manager = connect(&config).await.expect("Failed to connect");
    (container, RedisQueue::new(manager.clone()), RedisCache::new(manager))
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_queue_is_fifo_per_key() {
    let (_container, queue, _) = setup().await;
    let produce = keys::produce("billing");
    let consume = keys::consume("billing", "orders.v1");

    queue.right_push(&produce, "first").await.unwrap();
    queue.right_push(&produce, "second").await.unwrap();
    queue.right_push(&consume, "other").await.unwrap();

    assert_eq!(queue.left_pop(&produce).await.unwrap().as_deref(), Some("first"));
    assert_eq!(queue.left_pop(&produce).await.unwrap().as_deref(), Some("second"));
    assert_eq!(queue.left_pop(&produce).await.unwrap(), None);
    assert_eq!(queue.left_pop(&consume).await.unwrap().as_deref(), Some("other"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_cache_round_trips_bytes() {
    let (_container, _, cache) = setup().await;

    cache
        .set("quote:42", b"{\"price\":10}".to_vec(), CacheExpiration::default())
        .await
        .unwrap();

    assert_eq!(cache.get("quote:42").await.unwrap(), Some(b"{\"price\":10}".to_vec()));
    assert_eq!(cache.get("quote:missing").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_relative_expiration_evicts_entry() {
    let (_container, _, cache) = setup().await;

    cache
        .set("short", b"v".to_vec(), CacheExpiration::relative(Duration::from_millis(300)))
        .await
        .unwrap();
    assert!(cache.get("short").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(cache.get("short").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_reads_extend_sliding_window() {
    let (_container, _, cache) = setup().await;
    cache
        .set("slide", b"v".to_vec(), CacheExpiration::sliding(Duration::from_millis(800)))
        .await
        .unwrap();

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(cache.get("slide").await.unwrap().is_some());
    }

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(cache.get("slide").await.unwrap(), None);
}
