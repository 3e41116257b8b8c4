//! Recurring job scheduler
//!
//! Job definitions live in `job_configs`. `start` registers one cron timer per
//! active job; each firing reloads the job row, marks it running, dispatches to
//! its handler and records the outcome. Handler failures are recorded on the
//! job and never reach other jobs.

pub mod cron;
pub mod handlers;

use chrono::Utc;
use cqi_common::db::{create_job_configs_table, JobConfig, JobStatus};
use cqi_common::events::{CqiEvent, EventBus};
use cqi_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::jobs;

pub use cron::{default_jobs, normalize_cron};
pub use handlers::{JobOutcome, JobParams, JobRunner, REPORT_NOT_IMPLEMENTED};

/// Result of one job execution
#[derive(Debug, Clone, Serialize)]
pub struct JobRunResult {
    pub job_name: String,
    pub status: JobStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Job definition plus timer state
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    #[serde(flatten)]
    pub config: JobConfig,
    /// Timer currently registered for this job
    pub scheduled: bool,
}

pub struct Scheduler {
    pool: SqlitePool,
    runner: Arc<JobRunner>,
    events: EventBus,
    defaults: Vec<JobConfig>,
    timers: Mutex<Option<JobScheduler>>,
    handles: Mutex<HashMap<String, Uuid>>,
}

impl Scheduler {
    pub fn new(pool: SqlitePool, runner: Arc<JobRunner>, events: EventBus) -> Self {
        Self {
            pool,
            runner,
            events,
            defaults: default_jobs(),
            timers: Mutex::new(None),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the catalog seeded into an empty job table
    pub fn with_defaults(mut self, defaults: Vec<JobConfig>) -> Self {
        self.defaults = defaults;
        self
    }

    /// Ensure the job table exists and holds at least the default catalog
    pub async fn ensure_jobs(&self) -> Result<()> {
        create_job_configs_table(&self.pool).await?;
        jobs::seed_if_empty(&self.pool, &self.defaults).await?;
        Ok(())
    }

    /// Register one timer per active job and start ticking
    ///
    /// Returns the number of timers registered. A job whose schedule cannot
    /// be parsed is logged and left unscheduled.
    pub async fn start(self: &Arc<Self>) -> Result<usize> {
        self.ensure_jobs().await?;

        let mut timers = self.timers.lock().await;
        if timers.is_some() {
            return Err(Error::Scheduler("scheduler already started".to_string()));
        }

        let sched = JobScheduler::new()
            .await
            .map_err(|e| Error::Scheduler(format!("Failed to create scheduler: {}", e)))?;

        let mut handles = self.handles.lock().await;
        handles.clear();

        for job in jobs::list_active_jobs(&self.pool).await? {
            match self.build_timer(&job) {
                Ok(timer) => {
                    let uuid = sched.add(timer).await.map_err(|e| {
                        Error::Scheduler(format!("Failed to add job {}: {}", job.job_name, e))
                    })?;
                    info!(job_name = %job.job_name, schedule = %job.schedule, "Scheduled job");
                    handles.insert(job.job_name.clone(), uuid);
                }
                Err(e) => {
                    error!(job_name = %job.job_name, "Job not scheduled: {}", e);
                }
            }
        }

        sched
            .start()
            .await
            .map_err(|e| Error::Scheduler(format!("Failed to start scheduler: {}", e)))?;

        let count = handles.len();
        *timers = Some(sched);
        info!("Scheduler started with {} job(s)", count);
        Ok(count)
    }

    fn build_timer(self: &Arc<Self>, job: &JobConfig) -> Result<Job> {
        let expression = normalize_cron(&job.schedule)?;
        let scheduler: Weak<Self> = Arc::downgrade(self);
        let job_name = job.job_name.clone();

        Job::new_async(expression.as_str(), move |_uuid, _lock| {
            let scheduler = scheduler.clone();
            let job_name = job_name.clone();
            Box::pin(async move {
                if let Some(scheduler) = scheduler.upgrade() {
                    scheduler.fire(&job_name).await;
                }
            })
        })
        .map_err(|e| Error::Scheduler(format!("Invalid schedule '{}': {}", job.schedule, e)))
    }

    /// Timer callback: run the job if it is still present and active
    pub async fn fire(&self, job_name: &str) {
        match jobs::get_job(&self.pool, job_name).await {
            Ok(Some(job)) if job.is_active => {
                self.execute(job).await;
            }
            Ok(_) => {
                warn!(job_name, "Timer fired for a missing or inactive job");
            }
            Err(e) => {
                error!(job_name, "Failed to load job on firing: {}", e);
            }
        }
    }

    /// Run a job immediately, outside its schedule
    ///
    /// Unknown and inactive jobs are rejected without touching any job row.
    pub async fn trigger(&self, job_name: &str) -> Result<JobRunResult> {
        let job = jobs::get_job(&self.pool, job_name)
            .await?
            .filter(|job| job.is_active)
            .ok_or_else(|| Error::NotFound(format!("Active job not found: {}", job_name)))?;
        Ok(self.execute(job).await)
    }

    /// Mark running, dispatch, record outcome
    async fn execute(&self, job: JobConfig) -> JobRunResult {
        let started = Instant::now();
        let now = Utc::now();

        if let Err(e) = jobs::mark_running(&self.pool, &job.job_name, now).await {
            error!(job_name = %job.job_name, "Failed to mark job running: {}", e);
        }
        self.events.emit_lossy(CqiEvent::JobStarted {
            job_name: job.job_name.clone(),
            job_type: job.job_type.to_string(),
            timestamp: now,
        });
        info!(job_name = %job.job_name, job_type = %job.job_type, "Job started");

        let result = self.runner.run(&job, now).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, outcome, error_message) = match result {
            Ok(outcome) => {
                info!(job_name = %job.job_name, duration_ms, "Job succeeded: {}", outcome.message);
                (JobStatus::Success, Some(outcome), None)
            }
            Err(e) => {
                error!(job_name = %job.job_name, duration_ms, "Job failed: {}", e);
                (JobStatus::Error, None, Some(e.to_string()))
            }
        };

        if let Err(e) =
            jobs::record_outcome(&self.pool, &job.job_name, status, error_message.as_deref()).await
        {
            error!(job_name = %job.job_name, "Failed to record job outcome: {}", e);
        }
        self.events.emit_lossy(CqiEvent::JobCompleted {
            job_name: job.job_name.clone(),
            status: status.to_string(),
            error: error_message.clone(),
            duration_ms,
            timestamp: Utc::now(),
        });

        JobRunResult {
            job_name: job.job_name,
            status,
            duration_ms,
            outcome,
            error: error_message,
        }
    }

    /// Cancel every timer
    pub async fn stop_all(&self) -> Result<()> {
        let mut timers = self.timers.lock().await;
        if let Some(mut sched) = timers.take() {
            sched
                .shutdown()
                .await
                .map_err(|e| Error::Scheduler(format!("Failed to stop scheduler: {}", e)))?;
        }
        let mut handles = self.handles.lock().await;
        let stopped = handles.len();
        handles.clear();
        info!("Scheduler stopped ({} timer(s) cancelled)", stopped);
        Ok(())
    }

    /// Reload job definitions and re-register timers
    pub async fn restart(self: &Arc<Self>) -> Result<usize> {
        self.stop_all().await?;
        self.start().await
    }

    /// Every job with whether a timer is registered for it
    pub async fn get_status(&self) -> Result<Vec<JobStatusView>> {
        let handles = self.handles.lock().await;
        Ok(jobs::list_jobs(&self.pool)
            .await?
            .into_iter()
            .map(|config| JobStatusView {
                scheduled: handles.contains_key(&config.job_name),
                config,
            })
            .collect())
    }

    pub async fn is_running(&self) -> bool {
        self.timers.lock().await.is_some()
    }
}
