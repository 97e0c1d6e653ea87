//! Scheduler context shared by the pool, the runner and status readers.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{JobStatus, RunHistory, RunHistoryEntry};
use crate::error::Result;

/// Mutable scheduler state. Always accessed through the scheduler's lock.
#[derive(Debug, Default)]
pub struct SchedulerState {
    /// One entry per job id ever seen; never removed
    jobs: BTreeMap<String, JobStatus>,
    history: RunHistory,
    /// A full cycle is in progress
    pub running: bool,
    pub last_cycle_started_at: Option<DateTime<Utc>>,
}

impl SchedulerState {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            history: RunHistory::with_capacity(history_capacity),
            ..Default::default()
        }
    }

    /// Status for a job, created on first sight.
    pub fn status_mut(&mut self, job_id: &str) -> &mut JobStatus {
        self.jobs.entry(job_id.to_string()).or_default()
    }

    pub fn status(&self, job_id: &str) -> Option<&JobStatus> {
        self.jobs.get(job_id)
    }

    pub fn is_job_running(&self, job_id: &str) -> bool {
        self.jobs.get(job_id).is_some_and(JobStatus::is_running)
    }

    /// Mark a job as started unless it already has a run in flight.
    pub fn try_start(&mut self, job_id: &str, now: DateTime<Utc>) -> bool {
        let status = self.status_mut(job_id);
        if status.is_running() {
            return false;
        }
        status.start(now);
        true
    }

    pub fn record_run(&mut self, entry: RunHistoryEntry) {
        self.history.push(entry);
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    pub fn begin_cycle(&mut self, now: DateTime<Utc>) {
        self.running = true;
        self.last_cycle_started_at = Some(now);
    }

    pub fn end_cycle(&mut self) {
        self.running = false;
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            running: self.running,
            last_cycle_started_at: self.last_cycle_started_at,
            history: self.history.entries(),
            jobs: self.jobs.clone(),
        }
    }
}

/// Point-in-time copy of the scheduler state for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub last_cycle_started_at: Option<DateTime<Utc>>,
    pub history: Vec<RunHistoryEntry>,
    pub jobs: BTreeMap<String, JobStatus>,
}

impl StatusSnapshot {
    /// Write as pretty JSON, replacing the file atomically.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
