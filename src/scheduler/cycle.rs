//! Cycle trigger - periodic full runs of the catalog.
//!
//! A cycle loads the catalog and runs every job through the pool. Cycles never
//! overlap: a tick that arrives while one is still running is skipped.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};

use super::pool::PoolScheduler;
use crate::domain::JobState;

/// Outcome counts for one full cycle.
///
/// `succeeded` and `failed` split runs by exit code; `blocked` counts runs that
/// ended in the blocked state regardless of exit code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub jobs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub blocked: usize,
    pub elapsed_ms: u64,
}

impl PoolScheduler {
    /// Run the whole catalog once. `None` when a cycle is already in progress.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        let started_at = Utc::now();
        {
            let mut state = self.state.write().await;
            if state.running {
                log::info!("Cycle already in progress, skipping");
                return None;
            }
            state.begin_cycle(started_at);
        }
        self.persist_snapshot().await;
        let clock = Instant::now();

        let catalog = self.catalog.clone();
        let jobs = match tokio::task::spawn_blocking(move || catalog.load()).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "Catalog load task failed");
                Vec::new()
            }
        };
        tracing::info!(jobs = jobs.len(), "Cycle started");

        let results = self.run_pool(jobs, self.concurrency).await;

        let report = {
            let mut state = self.state.write().await;
            state.end_cycle();
            let blocked = results
                .iter()
                .filter(|entry| state.status(&entry.job_id).is_some_and(|s| s.state == JobState::Blocked))
                .count();
            let succeeded = results.iter().filter(|entry| entry.exit_code == 0).count();
            CycleReport {
                started_at,
                jobs: results.len(),
                succeeded,
                failed: results.len() - succeeded,
                blocked,
                elapsed_ms: clock.elapsed().as_millis() as u64,
            }
        };
        self.persist_snapshot().await;

        tracing::info!(
            jobs = report.jobs,
            succeeded = report.succeeded,
            failed = report.failed,
            blocked = report.blocked,
            elapsed_ms = report.elapsed_ms,
            "Cycle finished"
        );
        Some(report)
    }
}

/// Fires full cycles on a fixed interval.
pub struct CycleTrigger {
    scheduler: PoolScheduler,
    interval: Duration,
    run_on_start: bool,
}

impl CycleTrigger {
    pub fn new(scheduler: PoolScheduler, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
            run_on_start: false,
        }
    }

    /// Also run a cycle as soon as the trigger starts.
    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// Fire cycles until `shutdown` resolves.
    ///
    /// Cycles run in their own tasks so ticks keep being observed while one is
    /// in flight; a tick during a running cycle is skipped. A cycle still
    /// running at shutdown is left to the runtime.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let interval = self.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        log::info!(
            "Cycle trigger started: every {:?}, run on start: {}",
            interval,
            self.run_on_start
        );
        if self.run_on_start {
            self.spawn_cycle();
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Cycle trigger shutting down");
                    break;
                }
                _ = ticker.tick() => self.spawn_cycle(),
            }
        }
    }

    fn spawn_cycle(&self) {
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            if scheduler.run_cycle().await.is_none() {
                tracing::info!("Tick skipped, previous cycle still running");
            }
        });
    }
}
