//! Job status tracking
//!
//! One `JobStatus` exists per known job id for the life of the process. Only the
//! job runner drives its transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Not running; last run (if any) exited 0
    #[default]
    Idle,
    /// A run is in flight
    Running,
    /// Last run exited non-zero or timed out
    Error,
    /// Output suggested the source rejected or throttled the job
    Blocked,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::Error => "error",
            JobState::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable per-job status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_exit_code: Option<i32>,
}

impl JobStatus {
    /// Mark the start of a run
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Running;
        self.last_run_at = Some(now);
    }

    /// Apply a transition requested by an output line consumer.
    ///
    /// Returns true when the state actually changed.
    pub fn apply(&mut self, next: JobState) -> bool {
        if self.state == next {
            return false;
        }
        self.state = next;
        true
    }

    /// Record the run's exit code. Blocked is sticky for the run.
    pub fn finish(&mut self, exit_code: i32) {
        self.last_exit_code = Some(exit_code);
        if self.state != JobState::Blocked {
            self.state = if exit_code == 0 { JobState::Idle } else { JobState::Error };
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        let status = JobStatus::default();
        assert_eq!(status.state, JobState::Idle);
        assert!(status.last_run_at.is_none());
        assert!(status.last_exit_code.is_none());
    }

    #[test]
    fn test_start_sets_running() {
        let mut status = JobStatus::default();
        let now = Utc::now();
        status.start(now);
        assert!(status.is_running());
        assert_eq!(status.last_run_at, Some(now));
    }

    #[test]
    fn test_finish_success_and_failure() {
        let mut status = JobStatus::default();
        status.start(Utc::now());
        status.finish(0);
        assert_eq!(status.state, JobState::Idle);
        assert_eq!(status.last_exit_code, Some(0));

        status.start(Utc::now());
        status.finish(2);
        assert_eq!(status.state, JobState::Error);
        assert_eq!(status.last_exit_code, Some(2));
    }

    #[test]
    fn test_blocked_survives_success() {
        let mut status = JobStatus::default();
        status.start(Utc::now());
        assert!(status.apply(JobState::Blocked));
        status.finish(0);
        assert_eq!(status.state, JobState::Blocked);
        assert_eq!(status.last_exit_code, Some(0));
    }

    #[test]
    fn test_blocked_cleared_by_next_start() {
        let mut status = JobStatus::default();
        status.start(Utc::now());
        status.apply(JobState::Blocked);
        status.finish(1);

        status.start(Utc::now());
        status.finish(0);
        assert_eq!(status.state, JobState::Idle);
    }

    #[test]
    fn test_apply_same_state_is_noop() {
        let mut status = JobStatus::default();
        status.start(Utc::now());
        assert!(!status.apply(JobState::Running));
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(serde_json::to_string(&JobState::Blocked).unwrap(), "\"blocked\"");
        assert_eq!(JobState::Error.to_string(), "error");
    }
}
