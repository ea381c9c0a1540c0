//! Building blocks for the service: logging, stream connections and the job set.

use relaykit_core::config::{BackgroundJobsConfig, MessagingConfig, ObservabilityConfig};
use relaykit_core::queue::DurableQueue;
use relaykit_core::store::{InboxStore, OutboxStore};
use relaykit_core::stream::StreamError;
use relaykit_redpanda::RedpandaStream;
use relaykit_relay::{
    ConsumerDbJob, ConsumerQueueJob, Job, JobScheduler, MessageProcessor, Producer, ProducerDbJob,
    ProducerQueueJob, RelaySettings, RetentionJob, SchedulerError, StreamRegistry,
    schedule_configured,
};
use relaykit_runtime::Pipeline;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// # Errors
///
/// Fails if a subscriber is already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_lowercase()));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()?;
    }
    Ok(())
}

/// One stream per configured connection, keyed by connection name.
///
/// # Errors
///
/// Returns the first connection that cannot be created.
pub fn connect_streams(messaging: &MessagingConfig) -> Result<StreamRegistry, StreamError> {
    let timeout = messaging.producer_send_timeout();
    messaging
        .connections
        .iter()
        .try_fold(StreamRegistry::new(), |registry, connection| {
            let stream = RedpandaStream::from_config(connection, timeout)?;
            Ok(registry.with(connection.name.clone(), Arc::new(stream)))
        })
}

/// Collaborators every reconciliation job draws from.
pub struct JobParts {
    pub pipeline: Arc<Pipeline>,
    pub producer: Arc<Producer>,
    pub processor: Arc<MessageProcessor>,
    pub queue: Arc<dyn DurableQueue>,
    pub outbox: Arc<dyn OutboxStore>,
    pub inbox: Arc<dyn InboxStore>,
    pub settings: RelaySettings,
}

/// The five reconciliation jobs.
pub fn relay_jobs(parts: &JobParts) -> Vec<Arc<dyn Job>> {
    vec![
        Arc::new(ConsumerDbJob::new(
            Arc::clone(&parts.inbox),
            Arc::clone(&parts.processor),
            parts.settings.clone(),
        )),
        Arc::new(ConsumerQueueJob::new(
            Arc::clone(&parts.pipeline),
            Arc::clone(&parts.queue),
            Arc::clone(&parts.processor),
            parts.settings.clone(),
        )),
        Arc::new(ProducerDbJob::new(
            Arc::clone(&parts.outbox),
            Arc::clone(&parts.producer),
        )),
        Arc::new(ProducerQueueJob::new(
            Arc::clone(&parts.queue),
            Arc::clone(&parts.producer),
            &parts.settings,
        )),
        Arc::new(RetentionJob::new(Arc::clone(&parts.pipeline), &parts.settings)),
    ]
}

/// Schedule every job from its configuration entry; returns the instance count.
///
/// # Errors
///
/// Stops at the first job without a configuration entry or with a bad schedule.
pub async fn schedule_all(
    scheduler: &dyn JobScheduler,
    config: &BackgroundJobsConfig,
    jobs: Vec<Arc<dyn Job>>,
) -> Result<usize, SchedulerError> {
    let mut scheduled = 0;
    for job in jobs {
        scheduled += schedule_configured(scheduler, config, job).await?.len();
    }
    Ok(scheduled)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relaykit_core::config::{AppConfig, JobConfig, StreamConnectionConfig, TopicConfig};
    use relaykit_relay::commands;
    use relaykit_relay::{JobInstance, ProducerSlot};
    use relaykit_relay::scheduler::instance_names;
    use relaykit_testing::{InMemoryInbox, InMemoryOutbox, InMemoryQueue};
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        registered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobScheduler for Recording {
        async fn register_job(
            &self,
            name: &str,
            _cron: &str,
            parameters: &[String],
            _job: Arc<dyn Job>,
        ) -> Result<Vec<JobInstance>, SchedulerError> {
            self.registered.lock().unwrap().push(name.to_string());
            Ok(instance_names(name, parameters))
        }
    }

    fn parts() -> JobParts {
        let outbox: Arc<dyn OutboxStore> = Arc::new(InMemoryOutbox::new());
        let inbox: Arc<dyn InboxStore> = Arc::new(InMemoryInbox::new());
        let queue: Arc<dyn DurableQueue> = Arc::new(InMemoryQueue::new());
        let slot = ProducerSlot::new();
        let pipeline = Arc::new(
            commands::register(Pipeline::builder(), Arc::clone(&outbox), Arc::clone(&inbox), &slot)
                .build()
                .unwrap(),
        );
        let settings = RelaySettings::default();
        let producer = Arc::new(Producer::new(
            Arc::clone(&pipeline),
            StreamRegistry::new(),
            Arc::clone(&queue),
            settings.clone(),
        ));
        slot.bind(&producer);
        JobParts {
            pipeline,
            producer,
            processor: Arc::new(MessageProcessor::new()),
            queue,
            outbox,
            inbox,
            settings,
        }
    }

    fn job(name: &str, parameters: &[&str]) -> JobConfig {
        JobConfig {
            name: name.to_string(),
            schedule: "0 */1 * * * *".to_string(),
            enabled: true,
            description: String::new(),
            parameters: parameters.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn test_shipped_config_is_valid_and_schedules_every_job() {
        let config = AppConfig::parse(include_str!("../../config/relaykit.toml")).unwrap();

        assert!(config.validate().is_ok());
        for job in relay_jobs(&parts()) {
            assert!(config.background_jobs.job(job.name()).is_ok(), "{} missing", job.name());
        }
    }

    #[test]
    fn test_relay_jobs_have_distinct_names() {
        let jobs = relay_jobs(&parts());

        let names: HashSet<&str> = jobs.iter().map(|job| job.name()).collect();
        assert_eq!(names.len(), 5);
        assert!(names.contains("ConsumerDbJob"));
        assert!(names.contains("RetentionJob"));
    }

    #[tokio::test]
    async fn test_every_job_is_scheduled_per_parameter() {
        let config = BackgroundJobsConfig {
            jobs: vec![
                job("ConsumerDbJob", &["orders", "audit"]),
                job("ConsumerQueueJob", &["orders"]),
                job("ProducerDbJob", &[]),
                job("ProducerQueueJob", &[]),
                job("RetentionJob", &[]),
            ],
        };
        let scheduler = Recording::default();

        let scheduled = schedule_all(&scheduler, &config, relay_jobs(&parts())).await.unwrap();

        assert_eq!(scheduled, 6);
        assert_eq!(scheduler.registered.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_unconfigured_job_fails_startup() {
        let config = BackgroundJobsConfig {
            jobs: vec![job("ConsumerDbJob", &["orders"])],
        };

        let result = schedule_all(&Recording::default(), &config, relay_jobs(&parts())).await;

        assert!(matches!(result, Err(SchedulerError::Config(_))));
    }

    #[test]
    fn test_streams_are_keyed_by_connection() {
        let messaging = MessagingConfig {
            connections: vec![StreamConnectionConfig {
                name: "main".to_string(),
                brokers: "localhost:9092".to_string(),
                topics: vec![TopicConfig {
                    name: "orders".to_string(),
                    value: "orders.v1".to_string(),
                    group_name: "billing".to_string(),
                }],
            }],
            ..MessagingConfig::default()
        };

        let streams = connect_streams(&messaging).unwrap();

        assert_eq!(streams.names().collect::<Vec<_>>(), vec!["main"]);
        assert!(streams.for_topic(&messaging, "orders.v1").is_some());
    }
}
