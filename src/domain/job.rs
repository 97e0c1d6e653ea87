//! Job descriptors - the immutable catalog entries the scheduler runs.

use serde::{Deserialize, Serialize};

/// Executor reference used when a descriptor does not name one.
pub const FALLBACK_EXECUTOR: &str = "fallback";

/// One schedulable unit of collection work tied to a single external source.
///
/// Descriptors are produced by the catalog merge and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Unique key across the merged catalog
    pub id: String,

    /// Display name
    pub name: String,

    /// Origin identifier, stamped on every record the job emits
    pub source: String,

    /// Opaque reference resolved by the executor registry
    #[serde(default = "default_executor")]
    pub executor: String,

    /// Specialized adapter (true) or generic fallback adapter (false)
    #[serde(default)]
    pub implemented: bool,
}

fn default_executor() -> String {
    FALLBACK_EXECUTOR.to_string()
}

impl JobDescriptor {
    /// Create a specialized job bound to a named executor
    pub fn specialized(id: &str, name: &str, source: &str, executor: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            source: source.to_string(),
            executor: executor.to_string(),
            implemented: true,
        }
    }

    /// Create a discovered job that runs on the fallback executor
    pub fn discovered(id: &str, name: &str, source: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            source: source.to_string(),
            executor: default_executor(),
            implemented: false,
        }
    }

    /// Whether the id can name a file inside a log or run directory.
    pub fn has_file_safe_id(&self) -> bool {
        !self.id.is_empty()
            && self.id != "."
            && self.id != ".."
            && !self.id.contains(['/', '\\', '\0'])
    }
}
