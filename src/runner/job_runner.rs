//! Job runner - executes one job under a timeout and keeps its status current.
//!
//! A run always resolves to an exit code. Failures, panics, timeouts and
//! unresolvable executors are all exit code 1 and never escape the runner.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{RwLock, mpsc};

use super::block::{BlockDetector, LineConsumer};
use super::log_sink::{LogSink, NullLogSink};
use crate::config::RunnerConfig;
use crate::domain::{JobDescriptor, Record, RunHistoryEntry};
use crate::jobs::{ExecutorRegistry, Job, JobContext};
use crate::scheduler::SchedulerState;
use crate::storage::DynRecordStore;

/// Timeouts and output heuristics for job runs.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub specialized_timeout: Duration,
    pub fallback_timeout: Duration,
    pub block_patterns: Vec<String>,
}

impl RunnerSettings {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            specialized_timeout: config.specialized_timeout(),
            fallback_timeout: config.fallback_timeout(),
            block_patterns: config.block_patterns.clone(),
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

/// Runs jobs and records their outcome in the shared scheduler state.
#[derive(Clone)]
pub struct JobRunner {
    state: Arc<RwLock<SchedulerState>>,
    registry: Arc<ExecutorRegistry>,
    store: Option<Arc<DynRecordStore>>,
    log_sink: Arc<dyn LogSink>,
    settings: RunnerSettings,
}

impl JobRunner {
    pub fn new(state: Arc<RwLock<SchedulerState>>, registry: Arc<ExecutorRegistry>, settings: RunnerSettings) -> Self {
        Self {
            state,
            registry,
            store: None,
            log_sink: Arc::new(NullLogSink),
            settings,
        }
    }

    /// Upsert collected records into this store.
    pub fn with_store(mut self, store: Arc<DynRecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_log_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.log_sink = Arc::new(sink);
        self
    }

    pub fn state(&self) -> Arc<RwLock<SchedulerState>> {
        self.state.clone()
    }

    /// Lifetime allotted to one run of `job`.
    pub fn timeout_for(&self, job: &JobDescriptor) -> Duration {
        if job.implemented {
            self.settings.specialized_timeout
        } else {
            self.settings.fallback_timeout
        }
    }

    /// Mark the job running and execute it to completion.
    pub async fn run(&self, job: &JobDescriptor) -> i32 {
        self.state.write().await.status_mut(&job.id).start(Utc::now());
        self.execute(job).await
    }

    /// Execute a job whose status was already moved to running.
    pub async fn execute(&self, job: &JobDescriptor) -> i32 {
        let started = Instant::now();
        self.log_sink.started(&job.id);
        tracing::info!(job_id = %job.id, source = %job.source, implemented = job.implemented, "Job started");

        let (exit_code, records) = match self.registry.resolve(job) {
            Ok(executor) => self.supervise(job, executor).await,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Executor resolution failed");
                self.log_sink.line(&job.id, &e.to_string());
                (1, Vec::new())
            }
        };

        if !records.is_empty() {
            self.store_records(job, records).await;
        }

        let final_state = {
            let mut state = self.state.write().await;
            let status = state.status_mut(&job.id);
            status.finish(exit_code);
            let final_state = status.state;
            state.record_run(RunHistoryEntry::new(&job.id, exit_code));
            final_state
        };

        self.log_sink.finished(&job.id, exit_code);
        tracing::info!(
            job_id = %job.id,
            exit_code = exit_code,
            state = %final_state,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job finished"
        );
        exit_code
    }

    /// Run the job in its own task, feeding its output to the block detector,
    /// until it finishes or its time is up.
    async fn supervise(&self, job: &JobDescriptor, executor: Arc<dyn Job>) -> (i32, Vec<Record>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = JobContext::new(job.clone(), tx);
        let mut handle = tokio::spawn(async move { executor.run(ctx).await });

        let timeout = self.timeout_for(job);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut detector = BlockDetector::new(&self.settings.block_patterns);

        let joined = loop {
            tokio::select! {
                biased;
                _ = &mut deadline => {
                    // Dropping the task drops the child process with it
                    handle.abort();
                    break None;
                }
                joined = &mut handle => break Some(joined),
                Some(line) = rx.recv() => self.consume_line(job, &mut detector, &line).await,
            }
        };

        while let Ok(line) = rx.try_recv() {
            self.consume_line(job, &mut detector, &line).await;
        }

        match joined {
            Some(Ok(Ok(output))) => (output.exit_code, output.records),
            Some(Ok(Err(e))) => {
                tracing::warn!(job_id = %job.id, error = %e, "Job failed");
                self.log_sink.line(&job.id, &format!("error: {}", e));
                (1, Vec::new())
            }
            Some(Err(e)) => {
                tracing::error!(job_id = %job.id, error = ?e, "Job task panicked");
                (1, Vec::new())
            }
            None => {
                tracing::warn!(job_id = %job.id, timeout_secs = timeout.as_secs(), "Job timed out");
                self.log_sink.line(&job.id, &format!("timed out after {:?}", timeout));
                (1, Vec::new())
            }
        }
    }

    async fn consume_line(&self, job: &JobDescriptor, consumer: &mut dyn LineConsumer, line: &str) {
        self.log_sink.line(&job.id, line);
        log::trace!("[{}] {}", job.id, line);

        if let Some(next) = consumer.consume(line) {
            let changed = self.state.write().await.status_mut(&job.id).apply(next);
            if changed {
                tracing::warn!(job_id = %job.id, state = %next, line = %line, "Job state changed by output");
            }
        }
    }

    async fn store_records(&self, job: &JobDescriptor, mut records: Vec<Record>) {
        let Some(store) = self.store.clone() else {
            log::debug!("No record store configured, dropping {} records from {}", records.len(), job.id);
            return;
        };

        for record in &mut records {
            record.source = job.source.clone();
        }

        match tokio::task::spawn_blocking(move || store.upsert_batch(records)).await {
            Ok(summary) => tracing::info!(
                job_id = %job.id,
                inserted = summary.inserted,
                updated = summary.updated,
                unchanged = summary.unchanged,
                failed = summary.failed,
                "Records stored"
            ),
            Err(e) => tracing::error!(job_id = %job.id, error = %e, "Record upsert task failed"),
        }
    }
}
