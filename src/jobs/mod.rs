//! The job contract - one unit of collection work for one source.
//!
//! A job streams output lines through its [`JobContext`] while it runs and
//! returns an exit code plus the records it collected. Jobs never touch the
//! scheduler's status; the runner derives everything from lines and output.

mod command;
mod registry;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

pub use command::{CommandJob, parse_record_line};
pub use registry::ExecutorRegistry;

use crate::domain::{JobDescriptor, Record};
use crate::error::Result;

/// What a finished job hands back to the runner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutput {
    pub exit_code: i32,
    pub records: Vec<Record>,
}

impl JobOutput {
    /// Exit code 0 with the collected records
    pub fn success(records: Vec<Record>) -> Self {
        Self { exit_code: 0, records }
    }

    /// Given exit code, no records
    pub fn exited(exit_code: i32) -> Self {
        Self {
            exit_code,
            records: Vec::new(),
        }
    }
}

/// Per-run handle given to a job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job: JobDescriptor,
    lines: UnboundedSender<String>,
}

impl JobContext {
    pub fn new(job: JobDescriptor, lines: UnboundedSender<String>) -> Self {
        Self { job, lines }
    }

    /// Report one line of output.
    pub fn emit(&self, line: impl Into<String>) {
        // The runner stops listening once the run has timed out
        let _ = self.lines.send(line.into());
    }
}

/// A unit of collection work.
#[async_trait]
pub trait Job: Send + Sync {
    /// Run to completion. `Err` counts as a failed run with exit code 1.
    async fn run(&self, ctx: JobContext) -> Result<JobOutput>;
}
