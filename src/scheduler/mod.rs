//! Scheduler module for pooled job execution and periodic cycles.
//!
//! This module provides:
//! - **PoolScheduler**: runs job lists with bounded concurrency, single-job
//!   triggers and status snapshots.
//! - **CycleTrigger**: fires a full catalog cycle on a fixed interval.
//! - **SchedulerState**: per-job status, run history and cycle flags, shared
//!   behind one lock.
//!
//! # Example
//!
//! ```ignore
//! use harvestr::scheduler::{CycleTrigger, PoolScheduler};
//!
//! let scheduler = PoolScheduler::from_config(&config, store);
//! let trigger = CycleTrigger::new(scheduler.clone(), config.scheduler.interval())
//!     .with_run_on_start(true);
//! trigger.run(shutdown).await;
//! ```

mod cycle;
mod pool;
mod state;

pub use cycle::{CycleReport, CycleTrigger};
pub use pool::PoolScheduler;
pub use state::{SchedulerState, StatusSnapshot};
