//! Catalog source trait and the fixed job list.

use crate::domain::JobDescriptor;
use crate::error::Result;

/// Anything that can produce job descriptors for the catalog.
pub trait CatalogSource: Send + Sync {
    /// Human-readable name used in log messages
    fn name(&self) -> &str;

    /// Read the descriptors this source currently holds
    fn load(&self) -> Result<Vec<JobDescriptor>>;
}

/// The hand-maintained list of specialized jobs.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    jobs: Vec<JobDescriptor>,
}

impl StaticSource {
    pub fn new(jobs: Vec<JobDescriptor>) -> Self {
        Self { jobs }
    }

    pub fn entries(&self) -> &[JobDescriptor] {
        &self.jobs
    }
}

impl CatalogSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    fn load(&self) -> Result<Vec<JobDescriptor>> {
        Ok(self.jobs.clone())
    }
}
