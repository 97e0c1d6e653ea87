//! Configuration system for Harvestr.
//!
//! A single YAML file (`harvestr.yml`) covers the scheduler, the job runner,
//! the record store, the job catalog and the executor commands.

use std::path::PathBuf;

use eyre::Result;

pub use self::global::{
    CatalogConfig, ExecutorConfig, GlobalConfig, RunnerConfig, SchedulerConfig, StorageConfig,
};

mod global;

/// Default output patterns that mark a job as blocked by its source.
pub fn default_block_patterns() -> Vec<String> {
    vec![
        "403".to_string(),
        "Forbidden".to_string(),
        "blocked".to_string(),
        "Access Denied".to_string(),
    ]
}

/// Load configuration from the standard search paths.
///
/// Search order:
/// 1. Explicit path if provided
/// 2. harvestr.yml in current directory (project config)
/// 3. ~/.config/harvestr/harvestr.yml (user config)
/// 4. Default values
pub fn load_config(explicit_path: Option<&PathBuf>) -> Result<GlobalConfig> {
    let config = GlobalConfig::load(explicit_path)?;
    config.validate()?;
    Ok(config)
}
