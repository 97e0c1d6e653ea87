//! Pool scheduler - runs a list of jobs with bounded concurrency.
//!
//! Jobs are admitted in FIFO order from a queue into an in-flight set that
//! never holds more than `concurrency` runs. Each run happens in its own task;
//! a failure, timeout or block in one run never affects the others, and the
//! pool always drains.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::RwLock;

use super::state::{SchedulerState, StatusSnapshot};
use crate::catalog::JobCatalog;
use crate::config::GlobalConfig;
use crate::domain::{JobDescriptor, RunHistoryEntry};
use crate::jobs::ExecutorRegistry;
use crate::runner::{FileLogSink, JobRunner, RunnerSettings};
use crate::storage::DynRecordStore;

/// Owns the scheduler context and drives job runs. Cheap to clone.
#[derive(Clone)]
pub struct PoolScheduler {
    pub(super) state: Arc<RwLock<SchedulerState>>,
    pub(super) runner: JobRunner,
    pub(super) catalog: Arc<JobCatalog>,
    pub(super) concurrency: usize,
    snapshot_path: Option<PathBuf>,
}

impl PoolScheduler {
    /// The scheduler shares the runner's state.
    pub fn new(runner: JobRunner, catalog: JobCatalog, concurrency: usize) -> Self {
        Self {
            state: runner.state(),
            runner,
            catalog: Arc::new(catalog),
            concurrency: concurrency.max(1),
            snapshot_path: None,
        }
    }

    /// Wire up a scheduler from configuration.
    ///
    /// No status snapshot is mirrored; only the long-running daemon owns the
    /// snapshot file (see [`with_snapshot_path`](Self::with_snapshot_path)).
    pub fn from_config(config: &GlobalConfig, store: Arc<DynRecordStore>) -> Self {
        let state = Arc::new(RwLock::new(SchedulerState::new(config.scheduler.history_capacity)));
        let registry = Arc::new(ExecutorRegistry::from_config(config));
        let runner = JobRunner::new(state, registry, RunnerSettings::from_config(&config.runner))
            .with_store(store)
            .with_log_sink(FileLogSink::new(config.job_log_dir()));

        Self::new(runner, JobCatalog::from_config(&config.catalog), config.scheduler.concurrency)
    }

    /// Mirror the status snapshot to this file after every run and cycle boundary.
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn catalog(&self) -> &JobCatalog {
        &self.catalog
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every job once, at most `concurrency` at a time.
    ///
    /// Returns one entry per job run, in completion order. A repeated id is
    /// scheduled once, at its first position; a job that already has a run in
    /// flight (a manual trigger) is skipped.
    pub async fn run_pool(&self, jobs: Vec<JobDescriptor>, concurrency: usize) -> Vec<RunHistoryEntry> {
        let limit = concurrency.max(1);

        let mut seen = HashSet::new();
        let mut queue: VecDeque<JobDescriptor> = jobs
            .into_iter()
            .filter(|job| {
                let first = seen.insert(job.id.clone());
                if !first {
                    log::warn!("Job {} listed twice, scheduling it once", job.id);
                }
                first
            })
            .collect();

        let total = queue.len();
        tracing::info!(jobs = total, concurrency = limit, "Pool started");

        let mut in_flight = FuturesUnordered::new();
        let mut completed = Vec::with_capacity(total);

        while !queue.is_empty() || !in_flight.is_empty() {
            while in_flight.len() < limit {
                let Some(job) = queue.pop_front() else { break };
                tracing::debug!(job_id = %job.id, in_flight = in_flight.len() + 1, "Admitting job");
                in_flight.push(self.run_isolated(job));
            }

            if let Some(Some(entry)) = in_flight.next().await {
                completed.push(entry);
            }
        }

        tracing::info!(jobs = total, "Pool drained");
        completed
    }

    /// Run one job in its own task so a panic cannot take the pool down.
    /// `None` when the job was already running.
    async fn run_isolated(&self, job: JobDescriptor) -> Option<RunHistoryEntry> {
        if !self.state.write().await.try_start(&job.id, Utc::now()) {
            tracing::warn!(job_id = %job.id, "Job already running, skipped this round");
            return None;
        }

        let job_id = job.id.clone();
        let runner = self.runner.clone();

        let exit_code = match tokio::spawn(async move { runner.execute(&job).await }).await {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = ?e, "Runner task failed");
                1
            }
        };

        self.persist_snapshot().await;
        Some(RunHistoryEntry::new(&job_id, exit_code))
    }

    /// Start one job outside the pool's accounting.
    ///
    /// Returns false when the id is unknown or the job already has a run in
    /// flight; the run itself proceeds in the background.
    pub async fn trigger_single_job(&self, job_id: &str) -> bool {
        let Some(job) = self.claim(job_id).await else {
            return false;
        };

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.runner.execute(&job).await;
            scheduler.persist_snapshot().await;
        });
        true
    }

    /// Run one job and wait for it. `None` when the id is unknown or the job
    /// is already running.
    pub async fn run_single_job(&self, job_id: &str) -> Option<i32> {
        let job = self.claim(job_id).await?;
        let exit_code = self.runner.execute(&job).await;
        self.persist_snapshot().await;
        Some(exit_code)
    }

    /// Look the job up and mark it running, unless it already is.
    async fn claim(&self, job_id: &str) -> Option<JobDescriptor> {
        let job = match self.catalog.find(job_id) {
            Ok(job) => job,
            Err(e) => {
                log::warn!("Cannot trigger {}: {}", job_id, e);
                return None;
            }
        };

        if !self.state.write().await.try_start(&job.id, Utc::now()) {
            log::info!("Job {} is already running, trigger refused", job.id);
            return None;
        }
        Some(job)
    }

    /// Current status of every known job, the history and the cycle flags.
    pub async fn snapshot(&self) -> StatusSnapshot {
        self.state.read().await.snapshot()
    }

    pub(super) async fn persist_snapshot(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let snapshot = self.snapshot().await;
        if let Err(e) = snapshot.write_to(path) {
            log::warn!("Failed to write status snapshot to {}: {}", path.display(), e);
        }
    }
}
