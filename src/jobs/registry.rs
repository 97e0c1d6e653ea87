//! Executor references resolved to runnable jobs.

use std::collections::HashMap;
use std::sync::Arc;

use super::{CommandJob, Job};
use crate::config::GlobalConfig;
use crate::domain::{FALLBACK_EXECUTOR, JobDescriptor};
use crate::error::{HarvestrError, Result};

/// Maps executor references to jobs, with a fallback for generic sources.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Job>>,
    fallback: Option<Arc<dyn Job>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build command executors from the `executors` and `fallback-executor` config.
    pub fn from_config(config: &GlobalConfig) -> Self {
        let records_dir = config.storage.data_dir.join("runs");
        let mut registry = Self::new();

        for (name, executor) in &config.executors {
            registry.register(name, CommandJob::new(executor.clone(), &records_dir));
        }
        if let Some(fallback) = &config.fallback_executor {
            registry.set_fallback(CommandJob::new(fallback.clone(), &records_dir));
        }

        log::debug!(
            "Executor registry: {} executors, fallback {}",
            registry.executors.len(),
            if registry.fallback.is_some() { "configured" } else { "missing" }
        );
        registry
    }

    pub fn register(&mut self, name: &str, job: impl Job + 'static) {
        self.executors.insert(name.to_string(), Arc::new(job));
    }

    pub fn set_fallback(&mut self, job: impl Job + 'static) {
        self.fallback = Some(Arc::new(job));
    }

    /// Builder-style `register`
    pub fn with(mut self, name: &str, job: impl Job + 'static) -> Self {
        self.register(name, job);
        self
    }

    /// Builder-style `set_fallback`
    pub fn with_fallback(mut self, job: impl Job + 'static) -> Self {
        self.set_fallback(job);
        self
    }

    /// Resolve the job that runs a descriptor.
    ///
    /// Discovered descriptors and descriptors without an executor reference run
    /// on the fallback; a named reference that is not registered is an error.
    pub fn resolve(&self, job: &JobDescriptor) -> Result<Arc<dyn Job>> {
        let wants_fallback = !job.implemented || job.executor.is_empty() || job.executor == FALLBACK_EXECUTOR;

        if !wants_fallback {
            return self
                .executors
                .get(&job.executor)
                .cloned()
                .ok_or_else(|| HarvestrError::Executor(format!("Unknown executor '{}' for job {}", job.executor, job.id)));
        }

        self.fallback
            .clone()
            .ok_or_else(|| HarvestrError::Executor(format!("No fallback executor configured for job {}", job.id)))
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Registered executor references, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.names())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
