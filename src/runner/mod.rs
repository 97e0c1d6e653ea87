//! Job runner module - executes one job run under supervision.
//!
//! This module provides:
//! - JobRunner for running a single job with a timeout
//! - LineConsumer / BlockDetector for heuristic block detection
//! - LogSink / FileLogSink for per-job log files

mod block;
mod job_runner;
mod log_sink;

pub use block::{BlockDetector, LineConsumer};
pub use job_runner::{JobRunner, RunnerSettings};
pub use log_sink::{FileLogSink, LogSink, NullLogSink};
