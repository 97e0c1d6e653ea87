//! Bounded run history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of entries retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// One completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub job_id: String,
    pub exit_code: i32,
    pub timestamp: DateTime<Utc>,
}

impl RunHistoryEntry {
    pub fn new(job_id: &str, exit_code: i32) -> Self {
        Self {
            job_id: job_id.to_string(),
            exit_code,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only ring of run results; oldest entries are evicted past capacity.
#[derive(Debug, Clone)]
pub struct RunHistory {
    entries: VecDeque<RunHistoryEntry>,
    capacity: usize,
}

impl Default for RunHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl RunHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: RunHistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries in append (completion) order, oldest first
    pub fn entries(&self) -> Vec<RunHistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Number of retained entries for one job
    pub fn count_for(&self, job_id: &str) -> usize {
        self.entries.iter().filter(|e| e.job_id == job_id).count()
    }
}
