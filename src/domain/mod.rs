//! Domain types for Harvestr
//!
//! - JobDescriptor: immutable catalog entry for one collection job
//! - JobStatus / JobState: per-job lifecycle state owned by the scheduler
//! - RunHistory: bounded ring of completed runs
//! - Record: a collected item with its append-only change log

pub mod history;
pub mod job;
pub mod record;
pub mod status;

pub use history::{DEFAULT_HISTORY_CAPACITY, RunHistory, RunHistoryEntry};
pub use job::{FALLBACK_EXECUTOR, JobDescriptor};
pub use record::{ChangeAction, ChangeLogEntry, Record, RecordKey};
pub use status::{JobState, JobStatus};
