//! Cron scheduling for the reconciliation jobs.
//!
//! [`JobScheduler`] is the seam: the provided [`CronScheduler`] runs jobs in process
//! on `tokio-cron-scheduler`; a clustered deployment can plug in a scheduler that
//! deduplicates triggers across members behind the same trait.
//!
//! A job configured with parameters gets one instance per parameter:
//!
//! ```text
//! ConsumerDbJob, parameters ["Orders", "Payments"]
//!   ConsumerDbJob0  trigger ConsumerDbJob0_Trigger  group ConsumerDbJob_Group  parameter Orders
//!   ConsumerDbJob1  trigger ConsumerDbJob1_Trigger  group ConsumerDbJob_Group  parameter Payments
//! ```

use crate::jobs::{Job, JobContext};
use async_trait::async_trait;
use relaykit_core::config::{BackgroundJobsConfig, ConfigError};
use relaykit_runtime::metrics::RelayMetrics;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler as CronJobScheduler};
use tokio_util::sync::CancellationToken;

/// Errors from scheduling jobs.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The underlying scheduler could not be created
    #[error("Failed to create scheduler: {0}")]
    CreationFailed(String),

    /// A job instance was rejected (usually a bad cron expression)
    #[error("Failed to register job '{name}': {reason}")]
    JobRegistrationFailed {
        /// Instance name
        name: String,
        /// Why
        reason: String,
    },

    /// The scheduler could not start
    #[error("Failed to start scheduler: {0}")]
    StartFailed(String),

    /// The scheduler could not stop
    #[error("Failed to stop scheduler: {0}")]
    StopFailed(String),

    /// The job is missing from configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// One scheduled instance of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInstance {
    /// `{name}` or `{name}{index}`
    pub name: String,
    /// `{instance}_Trigger`
    pub trigger: String,
    /// `{name}_Group`
    pub group: String,
    /// Parameter handed to the job, if any
    pub parameter: Option<String>,
}

/// Instances for job `name` configured with `parameters`.
#[must_use]
pub fn instance_names(name: &str, parameters: &[String]) -> Vec<JobInstance> {
    let group = format!("{name}_Group");
    let instance = |instance: String, parameter: Option<String>| JobInstance {
        trigger: format!("{instance}_Trigger"),
        name: instance,
        group: group.clone(),
        parameter,
    };

    if parameters.is_empty() {
        return vec![instance(name.to_string(), None)];
    }
    parameters
        .iter()
        .enumerate()
        .map(|(index, parameter)| instance(format!("{name}{index}"), Some(parameter.clone())))
        .collect()
}

/// Registers jobs against cron expressions.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Schedule `job` on `cron` (six fields, seconds first), once per parameter.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::JobRegistrationFailed`] if an instance is rejected.
    async fn register_job(
        &self,
        name: &str,
        cron: &str,
        parameters: &[String],
        job: Arc<dyn Job>,
    ) -> Result<Vec<JobInstance>, SchedulerError>;
}

/// Schedule `job` as configured under its name in `config`.
///
/// A disabled entry schedules nothing.
///
/// # Errors
///
/// Returns [`SchedulerError::Config`] if the job has no configuration entry, or the
/// scheduler's registration error.
pub async fn schedule_configured(
    scheduler: &dyn JobScheduler,
    config: &BackgroundJobsConfig,
    job: Arc<dyn Job>,
) -> Result<Vec<JobInstance>, SchedulerError> {
    let entry = config.job(job.name())?;
    if !entry.enabled {
        tracing::info!(job = %entry.name, "Job is disabled");
        return Ok(Vec::new());
    }
    scheduler
        .register_job(&entry.name, &entry.schedule, &entry.parameters, job)
        .await
}

/// A job instance that skips a trigger while its previous run is still going.
#[derive(Clone)]
struct GuardedJob {
    job: Arc<dyn Job>,
    instance: JobInstance,
    running: Arc<tokio::sync::Mutex<()>>,
    cancellation: CancellationToken,
}

impl GuardedJob {
    fn new(job: Arc<dyn Job>, instance: JobInstance, cancellation: CancellationToken) -> Self {
        Self {
            job,
            instance,
            running: Arc::new(tokio::sync::Mutex::new(())),
            cancellation,
        }
    }

    /// Run once unless a run is in flight; returns whether it ran.
    async fn fire(&self) -> bool {
        let Ok(_running) = self.running.try_lock() else {
            tracing::warn!(job = %self.instance.name, "Previous run still in progress, skipping trigger");
            return false;
        };
        if self.cancellation.is_cancelled() {
            return false;
        }

        let started = Instant::now();
        let ctx = JobContext::new(self.instance.parameter.clone(), self.cancellation.child_token());
        let handled = self.job.run(&ctx).await;

        RelayMetrics::record_job_run(self.job.name());
        tracing::debug!(
            job = %self.instance.name,
            handled,
            elapsed_ms = started.elapsed().as_millis(),
            "Job run finished"
        );
        true
    }
}

/// In-process cron scheduler.
#[derive(Clone)]
pub struct CronScheduler {
    inner: CronJobScheduler,
    cancellation: CancellationToken,
    instances: Arc<Mutex<Vec<JobInstance>>>,
}

impl CronScheduler {
    /// Create a scheduler whose job runs observe `cancellation`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::CreationFailed`] if the scheduler cannot be created.
    pub async fn new(cancellation: CancellationToken) -> Result<Self, SchedulerError> {
        let inner = CronJobScheduler::new()
            .await
            .map_err(|err| SchedulerError::CreationFailed(err.to_string()))?;
        Ok(Self {
            inner,
            cancellation,
            instances: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Start firing triggers.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::StartFailed`] if the scheduler cannot start.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.inner
            .start()
            .await
            .map_err(|err| SchedulerError::StartFailed(err.to_string()))?;
        tracing::info!(jobs = self.instances().len(), "Scheduler started");
        Ok(())
    }

    /// Cancel running jobs and stop firing triggers.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::StopFailed`] if the scheduler cannot stop.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.cancellation.cancel();
        let mut inner = self.inner.clone();
        inner
            .shutdown()
            .await
            .map_err(|err| SchedulerError::StopFailed(err.to_string()))?;
        tracing::info!("Scheduler stopped");
        Ok(())
    }

    /// Instances registered so far.
    #[must_use]
    pub fn instances(&self) -> Vec<JobInstance> {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl JobScheduler for CronScheduler {
    async fn register_job(
        &self,
        name: &str,
        cron: &str,
        parameters: &[String],
        job: Arc<dyn Job>,
    ) -> Result<Vec<JobInstance>, SchedulerError> {
        let instances = instance_names(name, parameters);

        for instance in &instances {
            let guarded = GuardedJob::new(Arc::clone(&job), instance.clone(), self.cancellation.clone());
            let definition = CronJob::new_async(cron, move |_id, _lock| {
                let guarded = guarded.clone();
                Box::pin(async move {
                    guarded.fire().await;
                })
            })
            .map_err(|err| SchedulerError::JobRegistrationFailed {
                name: instance.name.clone(),
                reason: err.to_string(),
            })?;

            self.inner
                .add(definition)
                .await
                .map_err(|err| SchedulerError::JobRegistrationFailed {
                    name: instance.name.clone(),
                    reason: err.to_string(),
                })?;

            tracing::debug!(
                job = %instance.name,
                trigger = %instance.trigger,
                group = %instance.group,
                cron,
                "Registered job"
            );
        }

        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(instances.iter().cloned());
        Ok(instances)
    }
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler")
            .field("instances", &self.instances())
            .finish_non_exhaustive()
    }
}
