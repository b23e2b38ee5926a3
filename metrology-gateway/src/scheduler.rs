//! Periodic job scheduler.

use crate::error::{BoxError, JobError, SchedulerError};
use crate::grace::Service;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Default period between two executions of a job.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

/// A unit of periodic work.
#[async_trait]
pub trait Job: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Runs the job once.
    async fn execute(&self) -> Result<(), JobError>;
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between two executions of the same job.
    pub period: Duration,
    /// Execute every job once at startup.
    pub run_immediately: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            run_immediately: false,
        }
    }
}

struct Entry {
    job: Arc<dyn Job>,
    cancel: CancellationToken,
}

/// Runs every registered job on a fixed period until shut down.
pub struct Scheduler {
    config: SchedulerConfig,
    jobs: Mutex<Vec<Entry>>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            jobs: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Registers a job. Jobs cannot be added once the scheduler runs.
    pub fn add_job(&self, job: Arc<dyn Job>) -> Result<(), SchedulerError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        tracing::debug!(job = job.name(), "job added");
        self.jobs.lock().push(Entry {
            job,
            cancel: CancellationToken::new(),
        });
        Ok(())
    }

    /// Returns the number of registered jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Runs every job until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> Result<(), SchedulerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let mut tasks = JoinSet::new();
        for entry in self.jobs.lock().iter() {
            tasks.spawn(run_job(
                Arc::clone(&entry.job),
                entry.cancel.clone(),
                self.config.clone(),
            ));
        }

        tracing::info!(
            "Scheduler started ({} jobs, period={:?})",
            tasks.len(),
            self.config.period
        );

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!("Job task failed: {}", e);
            }
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }

    /// Stops every job. Never blocks.
    pub fn shutdown(&self) {
        for entry in self.jobs.lock().iter() {
            entry.cancel.cancel();
        }
    }
}

async fn run_job(job: Arc<dyn Job>, cancel: CancellationToken, config: SchedulerConfig) {
    let start = if config.run_immediately {
        Instant::now()
    } else {
        Instant::now() + config.period
    };
    let mut ticker = tokio::time::interval_at(start, config.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tracing::debug!(job = job.name(), "executing job");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = job.execute() => {
                if let Err(e) = result {
                    tracing::error!(job = job.name(), "Job failed: {}", e);
                }
            }
        }
    }

    tracing::debug!(job = job.name(), "job stopped");
}

#[async_trait]
impl Service for Scheduler {
    async fn run(&self) -> Result<(), BoxError> {
        Scheduler::run(self).await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BoxError> {
        Scheduler::shutdown(self);
        Ok(())
    }
}
