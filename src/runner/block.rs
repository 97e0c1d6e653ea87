//! Output line consumers.
//!
//! Consumers see every output line of a run, synchronously and in order, and
//! may request a state transition for the job.

use crate::domain::JobState;

/// Receives each output line of one run.
pub trait LineConsumer: Send {
    /// Inspect a line; `Some(state)` asks the runner to move the job there.
    fn consume(&mut self, line: &str) -> Option<JobState>;
}

/// Flags a run as blocked when its output mentions a rejection.
///
/// Matching is a case-insensitive substring search. Only the first matching
/// line produces a transition.
#[derive(Debug, Clone)]
pub struct BlockDetector {
    patterns: Vec<String>,
    tripped: bool,
}

impl BlockDetector {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            tripped: false,
        }
    }

    pub fn tripped(&self) -> bool {
        self.tripped
    }

    fn matches(&self, line: &str) -> bool {
        let line = line.to_lowercase();
        self.patterns.iter().any(|p| line.contains(p.as_str()))
    }
}

impl LineConsumer for BlockDetector {
    fn consume(&mut self, line: &str) -> Option<JobState> {
        if self.tripped || !self.matches(line) {
            return None;
        }
        self.tripped = true;
        Some(JobState::Blocked)
    }
}
