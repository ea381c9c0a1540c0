//! Relaykit service.
//!
//! Loads `RELAYKIT_CONFIG` (default `config/relaykit.toml`), connects PostgreSQL,
//! Redis and every stream connection, then runs the consumer and the scheduled
//! reconciliation jobs until Ctrl+C.
//!
//! Topics without a registered handler are acknowledged as-is; services embedding
//! the relay register their own [`MessageProcessor`] handlers.

mod wiring;

use anyhow::Context;
use relaykit_core::config::AppConfig;
use relaykit_core::queue::DurableQueue;
use relaykit_core::store::{InboxStore, OutboxStore};
use relaykit_postgres::{PostgresInbox, PostgresOutbox};
use relaykit_redis::{RedisCache, RedisQueue};
use relaykit_relay::{
    Consumer, CronScheduler, MessageProcessor, Producer, ProducerSlot, RelaySettings, commands,
};
use relaykit_runtime::Pipeline;
use relaykit_runtime::metrics::MetricsServer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use wiring::{JobParts, connect_streams, init_tracing, relay_jobs, schedule_all};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    init_tracing(&config.observability)?;
    info!(
        environment = %config.environment,
        namespace = %config.app.namespace,
        "Starting relaykit"
    );

    if config.observability.metrics_enabled {
        let addr = config
            .observability
            .metrics_addr
            .parse::<std::net::SocketAddr>()
            .context("Invalid metrics address")?;
        MetricsServer::new(addr).serve()?;
    }

    let pool = relaykit_postgres::connect(&config.database).await?;
    relaykit_postgres::run_migrations(&pool).await?;
    let outbox: Arc<dyn OutboxStore> = Arc::new(PostgresOutbox::new(pool.clone()));
    let inbox: Arc<dyn InboxStore> = Arc::new(PostgresInbox::new(pool));

    let redis = relaykit_redis::connect(&config.redis)
        .await
        .context("Failed to connect to Redis")?;
    let queue: Arc<dyn DurableQueue> = Arc::new(RedisQueue::new(redis.clone()));
    let cache = Arc::new(RedisCache::new(redis));

    let streams = connect_streams(&config.messaging)?;

    let slot = ProducerSlot::new();
    let pipeline = Arc::new(
        commands::register(
            Pipeline::builder().configure(&config).cache_store(cache),
            Arc::clone(&outbox),
            Arc::clone(&inbox),
            &slot,
        )
        .build()?,
    );

    let shutdown = CancellationToken::new();
    let settings = RelaySettings::from_config(&config);
    let processor = Arc::new(MessageProcessor::new());
    let producer = Arc::new(
        Producer::new(
            Arc::clone(&pipeline),
            streams.clone(),
            Arc::clone(&queue),
            settings.clone(),
        )
        .with_shutdown(shutdown.child_token()),
    );
    slot.bind(&producer);

    let scheduler = CronScheduler::new(shutdown.child_token()).await?;
    let jobs = relay_jobs(&JobParts {
        pipeline: Arc::clone(&pipeline),
        producer,
        processor: Arc::clone(&processor),
        queue: Arc::clone(&queue),
        outbox,
        inbox,
        settings: settings.clone(),
    });
    let scheduled = schedule_all(&scheduler, &config.background_jobs, jobs).await?;
    scheduler.start().await?;
    info!(instances = scheduled, "Reconciliation jobs scheduled");

    let consumer = Arc::new(Consumer::new(
        pipeline,
        processor,
        streams,
        queue,
        settings,
        shutdown.child_token(),
    ));
    let consumer_task = tokio::spawn(consumer.run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    shutdown.cancel();
    if let Err(err) = scheduler.shutdown().await {
        error!(error = %err, "Scheduler did not stop cleanly");
    }
    if let Err(err) = consumer_task.await {
        error!(error = %err, "Consumer task failed");
    }

    info!("Relaykit stopped");
    Ok(())
}
