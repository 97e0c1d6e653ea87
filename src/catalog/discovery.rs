//! Discovered-site lists read from disk.
//!
//! Each file matched by the glob holds a list of sites, YAML or JSON by
//! extension:
//!
//! ```yaml
//! - id: carsrus
//!   name: Cars R Us
//!   source: carsrus.com
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::source::CatalogSource;
use crate::domain::JobDescriptor;
use crate::error::{HarvestrError, Result};

/// One entry of a discovered-site list. `name` defaults to `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveredSite {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub source: String,
}

impl From<DiscoveredSite> for JobDescriptor {
    fn from(site: DiscoveredSite) -> Self {
        let name = site.name.unwrap_or_else(|| site.id.clone());
        JobDescriptor::discovered(&site.id, &name, &site.source)
    }
}

/// Files matching one glob pattern.
#[derive(Debug, Clone)]
pub struct DiscoverySource {
    pattern: String,
}

impl DiscoverySource {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
        }
    }

    fn load_file(path: &Path) -> Result<Vec<DiscoveredSite>> {
        let content = fs::read_to_string(path)?;
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let sites = if is_json {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        Ok(sites)
    }
}

impl CatalogSource for DiscoverySource {
    fn name(&self) -> &str {
        &self.pattern
    }

    fn load(&self) -> Result<Vec<JobDescriptor>> {
        let paths = glob::glob(&self.pattern).map_err(|e| HarvestrError::Catalog(format!("{}: {}", self.pattern, e)))?;

        let mut jobs = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    log::warn!("Skipping unreadable discovery path: {}", e);
                    continue;
                }
            };

            match Self::load_file(&path) {
                Ok(sites) => {
                    log::debug!("Loaded {} discovered sites from {}", sites.len(), path.display());
                    jobs.extend(sites.into_iter().map(JobDescriptor::from));
                }
                Err(e) => {
                    log::warn!("Skipping discovery file {}: {}", path.display(), e);
                }
            }
        }

        Ok(jobs)
    }
}
