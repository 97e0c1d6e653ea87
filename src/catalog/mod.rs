//! Job descriptor catalog.
//!
//! The catalog merges a fixed list of specialized jobs with any number of
//! discovered-site lists. Fixed entries always win on id collision and a
//! broken discovery source never prevents the fixed list from loading.

mod discovery;
mod source;

use std::collections::HashSet;

pub use discovery::{DiscoveredSite, DiscoverySource};
pub use source::{CatalogSource, StaticSource};

use crate::config::CatalogConfig;
use crate::domain::JobDescriptor;
use crate::error::{HarvestrError, Result};

/// Ordered set of catalog sources.
pub struct JobCatalog {
    fixed: StaticSource,
    discovered: Vec<Box<dyn CatalogSource>>,
}

impl JobCatalog {
    pub fn new(fixed: StaticSource) -> Self {
        Self {
            fixed,
            discovered: Vec::new(),
        }
    }

    /// Builder-style: append a discovery source (consulted in insertion order)
    pub fn with_source(mut self, source: impl CatalogSource + 'static) -> Self {
        self.discovered.push(Box::new(source));
        self
    }

    /// Build the catalog described by the `catalog` config section.
    pub fn from_config(config: &CatalogConfig) -> Self {
        config
            .discovery
            .iter()
            .fold(Self::new(StaticSource::new(config.jobs.clone())), |catalog, pattern| {
                catalog.with_source(DiscoverySource::new(pattern))
            })
    }

    /// Merge every source into one deduplicated list.
    pub fn load(&self) -> Vec<JobDescriptor> {
        let mut seen = HashSet::new();
        let mut jobs = Vec::new();

        for job in self.fixed.entries() {
            if !job.has_file_safe_id() {
                log::warn!("Rejecting job id {:?} in fixed catalog: not usable as a file name", job.id);
                continue;
            }
            if seen.insert(job.id.clone()) {
                jobs.push(job.clone());
            } else {
                log::warn!("Duplicate job id '{}' in fixed catalog, keeping the first", job.id);
            }
        }

        for source in &self.discovered {
            let entries = match source.load() {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("Skipping catalog source {}: {}", source.name(), e);
                    continue;
                }
            };

            let mut added = 0;
            for mut job in entries {
                if !job.has_file_safe_id() {
                    log::warn!("Rejecting job id {:?} from {}: not usable as a file name", job.id, source.name());
                    continue;
                }
                if !seen.insert(job.id.clone()) {
                    continue;
                }
                job.implemented = false;
                jobs.push(job);
                added += 1;
            }
            log::debug!("Catalog source {} contributed {} jobs", source.name(), added);
        }

        log::info!("Catalog loaded with {} jobs", jobs.len());
        jobs
    }

    /// Load the catalog and return the job with the given id.
    pub fn find(&self, id: &str) -> Result<JobDescriptor> {
        self.load()
            .into_iter()
            .find(|job| job.id == id)
            .ok_or_else(|| HarvestrError::JobNotFound(id.to_string()))
    }
}
