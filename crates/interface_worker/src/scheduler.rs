//! Periodic job scheduler
//!
//! A `JobScheduler` is built once at startup and owns its jobs by name.
//! After `start` every job runs on its own tokio task at its interval;
//! `shutdown` stops the tasks between runs, so a pass in flight always
//! finishes. A job never overlaps itself: a tick or `trigger` arriving while
//! the previous run is still going is skipped.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use domain_inventory::{InventoryError, InventoryResult};

/// What one run of a job did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOutcome {
    /// Units of work completed (tenants reconciled, rows expired, ...)
    pub processed: u64,
    /// Units of work that failed without aborting the run
    pub failed: u64,
}

/// A unit of periodic background work
#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    /// Unique name, used to address the job
    fn name(&self) -> &str;

    /// Time between two scheduled runs
    fn interval(&self) -> Duration;

    async fn run(&self) -> InventoryResult<JobOutcome>;
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    #[error("Scheduler already started")]
    AlreadyStarted,

    #[error("Job {0} is already running")]
    AlreadyRunning(String),

    #[error("Job {name} failed: {source}")]
    JobFailed {
        name: String,
        #[source]
        source: InventoryError,
    },
}

/// Run counters for one job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStats {
    pub runs: u64,
    pub failures: u64,
    pub skipped: u64,
    pub last_outcome: Option<JobOutcome>,
    pub last_error: Option<String>,
}

struct JobEntry {
    job: Arc<dyn ScheduledJob>,
    enabled: AtomicBool,
    running: tokio::sync::Mutex<()>,
    stats: Mutex<JobStats>,
}

impl JobEntry {
    fn record<T>(&self, update: impl FnOnce(&mut JobStats) -> T) -> T {
        let mut guard = self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        update(&mut guard)
    }

    /// Runs the job unless a run is already in flight
    async fn execute(&self) -> Result<JobOutcome, SchedulerError> {
        let name = self.job.name().to_string();
        let Ok(_guard) = self.running.try_lock() else {
            self.record(|stats| stats.skipped += 1);
            debug!(job = %name, "Previous run still in flight; skipping");
            return Err(SchedulerError::AlreadyRunning(name));
        };

        match self.job.run().await {
            Ok(outcome) => {
                self.record(|stats| {
                    stats.runs += 1;
                    stats.last_outcome = Some(outcome);
                    stats.last_error = None;
                });
                debug!(job = %name, processed = outcome.processed, failed = outcome.failed, "Job run complete");
                Ok(outcome)
            }
            Err(source) => {
                self.record(|stats| {
                    stats.runs += 1;
                    stats.failures += 1;
                    stats.last_error = Some(source.to_string());
                });
                error!(job = %name, error = %source, retryable = source.is_retryable(), "Job run failed");
                Err(SchedulerError::JobFailed { name, source })
            }
        }
    }
}

/// Owns named jobs and drives them on tokio tasks
pub struct JobScheduler {
    jobs: BTreeMap<String, Arc<JobEntry>>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    started: bool,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JobScheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            jobs: BTreeMap::new(),
            shutdown,
            handles: Vec::new(),
            started: false,
        }
    }

    /// Adds an enabled job; names must be unique and the scheduler not yet started
    pub fn register<J: ScheduledJob>(&mut self, job: J) -> Result<(), SchedulerError> {
        if self.started {
            return Err(SchedulerError::AlreadyStarted);
        }
        let name = job.name().to_string();
        if self.jobs.contains_key(&name) {
            return Err(SchedulerError::DuplicateJob(name));
        }

        self.jobs.insert(
            name,
            Arc::new(JobEntry {
                job: Arc::new(job),
                enabled: AtomicBool::new(true),
                running: tokio::sync::Mutex::new(()),
                stats: Mutex::new(JobStats::default()),
            }),
        );
        Ok(())
    }

    /// Resumes scheduled runs of a job
    pub fn enable(&self, name: &str) -> Result<(), SchedulerError> {
        self.entry(name)?.enabled.store(true, Ordering::SeqCst);
        info!(job = name, "Job enabled");
        Ok(())
    }

    /// Stops scheduled runs of a job; `trigger` still works
    pub fn disable(&self, name: &str) -> Result<(), SchedulerError> {
        self.entry(name)?.enabled.store(false, Ordering::SeqCst);
        info!(job = name, "Job disabled");
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> Result<bool, SchedulerError> {
        Ok(self.entry(name)?.enabled.load(Ordering::SeqCst))
    }

    /// Runs a job now and waits for its outcome
    pub async fn trigger(&self, name: &str) -> Result<JobOutcome, SchedulerError> {
        let entry = self.entry(name)?.clone();
        info!(job = name, "Job triggered");
        entry.execute().await
    }

    pub fn stats(&self, name: &str) -> Result<JobStats, SchedulerError> {
        Ok(self.entry(name)?.record(|stats| stats.clone()))
    }

    /// Registered job names, sorted
    pub fn job_names(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Spawns one task per job; the first run of each job happens immediately
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.started {
            return Err(SchedulerError::AlreadyStarted);
        }
        self.started = true;

        for entry in self.jobs.values() {
            let entry = entry.clone();
            let mut shutdown = self.shutdown.subscribe();
            self.handles.push(tokio::spawn(async move {
                let name = entry.job.name().to_string();
                let mut ticker = tokio::time::interval(entry.job.interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => {
                            if !entry.enabled.load(Ordering::SeqCst) {
                                continue;
                            }
                            // Failures are logged and counted inside execute.
                            let _ = entry.execute().await;
                        }
                    }
                }
                debug!(job = %name, "Job loop stopped");
            }));
        }

        info!(jobs = self.jobs.len(), "Scheduler started");
        Ok(())
    }

    /// Signals every job loop to stop and waits for in-flight runs to finish
    pub async fn shutdown(&mut self) {
        if self.shutdown.send(true).is_err() {
            debug!("No job loops were listening for shutdown");
        }
        for handle in self.handles.drain(..) {
            if let Err(err) = handle.await {
                warn!(error = %err, "Job loop ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }

    fn entry(&self, name: &str) -> Result<&Arc<JobEntry>, SchedulerError> {
        self.jobs
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))
    }
}
