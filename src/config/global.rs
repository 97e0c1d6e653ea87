//! Global configuration.
//!
//! Loaded from ./harvestr.yml or ~/.config/harvestr/harvestr.yml

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{DEFAULT_HISTORY_CAPACITY, JobDescriptor};

/// Global configuration for Harvestr.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Default log level when RUST_LOG is unset.
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Pool and cycle settings.
    pub scheduler: SchedulerConfig,

    /// Per-run settings.
    pub runner: RunnerConfig,

    /// Record store settings.
    pub storage: StorageConfig,

    /// Job catalog sources.
    pub catalog: CatalogConfig,

    /// Executor commands keyed by executor reference.
    pub executors: HashMap<String, ExecutorConfig>,

    /// Executor used for discovered (not implemented) jobs.
    #[serde(rename = "fallback-executor")]
    pub fallback_executor: Option<ExecutorConfig>,
}

impl GlobalConfig {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. harvestr.yml in current directory
    /// 3. ~/.config/harvestr/harvestr.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // Explicit path takes precedence
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project config
        let project_config = PathBuf::from("harvestr.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from harvestr.yml");
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load harvestr.yml: {}", e);
                }
            }
        }

        // Try user config
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("harvestr").join("harvestr.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // Use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.concurrency == 0 {
            eyre::bail!("scheduler.concurrency must be > 0");
        }
        if self.scheduler.interval_secs == 0 {
            eyre::bail!("scheduler.interval-secs must be > 0");
        }
        if self.scheduler.history_capacity == 0 {
            eyre::bail!("scheduler.history-capacity must be > 0");
        }
        if self.runner.specialized_timeout_secs == 0 {
            eyre::bail!("runner.specialized-timeout-secs must be > 0");
        }
        if self.runner.fallback_timeout_secs == 0 {
            eyre::bail!("runner.fallback-timeout-secs must be > 0");
        }
        for (name, executor) in &self.executors {
            if executor.command.trim().is_empty() {
                eyre::bail!("executors.{}.command must not be empty", name);
            }
        }
        Ok(())
    }

    /// Directory for per-job log files.
    pub fn job_log_dir(&self) -> PathBuf {
        self.runner
            .log_dir
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("logs").join("jobs"))
    }

    /// File the scheduler mirrors its status snapshot to.
    pub fn snapshot_path(&self) -> PathBuf {
        self.scheduler
            .snapshot_file
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("status.json"))
    }
}

/// Pool and cycle settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum jobs in flight at once.
    pub concurrency: usize,

    /// Seconds between full cycles.
    #[serde(rename = "interval-secs")]
    pub interval_secs: u64,

    /// Run one cycle immediately when the daemon starts.
    #[serde(rename = "run-on-start")]
    pub run_on_start: bool,

    /// Completed runs kept in the history ring.
    #[serde(rename = "history-capacity")]
    pub history_capacity: usize,

    /// Status snapshot file (defaults to <data-dir>/status.json).
    #[serde(rename = "snapshot-file")]
    pub snapshot_file: Option<PathBuf>,
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            interval_secs: 12 * 60 * 60,
            run_on_start: true,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            snapshot_file: None,
        }
    }
}

/// Per-run settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Lifetime of a specialized job in seconds.
    #[serde(rename = "specialized-timeout-secs")]
    pub specialized_timeout_secs: u64,

    /// Lifetime of a fallback job in seconds.
    #[serde(rename = "fallback-timeout-secs")]
    pub fallback_timeout_secs: u64,

    /// Output substrings that mark a run as blocked (case-insensitive).
    #[serde(rename = "block-patterns")]
    pub block_patterns: Vec<String>,

    /// Per-job log directory (defaults to <data-dir>/logs/jobs).
    #[serde(rename = "log-dir")]
    pub log_dir: Option<PathBuf>,
}

impl RunnerConfig {
    pub fn specialized_timeout(&self) -> Duration {
        Duration::from_secs(self.specialized_timeout_secs)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_secs(self.fallback_timeout_secs)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            specialized_timeout_secs: 15 * 60,
            fallback_timeout_secs: 5 * 60,
            block_patterns: crate::config::default_block_patterns(),
            log_dir: None,
        }
    }
}

/// Record store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory for the record store, logs and status snapshot.
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let default_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("harvestr");

        Self { data_dir: default_dir }
    }
}

/// Job catalog sources.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Hand-maintained specialized jobs.
    pub jobs: Vec<JobDescriptor>,

    /// Glob patterns of discovered-site lists (YAML or JSON).
    pub discovery: Vec<String>,
}

/// An external program that performs one job run.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Program to execute.
    pub command: String,

    /// Arguments; `{id}`, `{name}` and `{source}` are substituted.
    pub args: Vec<String>,

    /// Extra environment variables.
    pub env: HashMap<String, String>,

    /// Working directory for the child process.
    #[serde(rename = "working-dir")]
    pub working_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GlobalConfig::default();
        assert_eq!(config.scheduler.concurrency, 4);
        assert_eq!(config.scheduler.interval(), Duration::from_secs(43_200));
        assert!(config.scheduler.run_on_start);
        assert_eq!(config.scheduler.history_capacity, 100);
        assert_eq!(config.runner.specialized_timeout(), Duration::from_secs(900));
        assert_eq!(config.runner.fallback_timeout(), Duration::from_secs(300));
        assert!(config.catalog.jobs.is_empty());
    }

    #[test]
    fn test_config_validation() {
        let config = GlobalConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let config = GlobalConfig {
            scheduler: SchedulerConfig {
                concurrency: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = GlobalConfig {
            runner: RunnerConfig {
                fallback_timeout_secs: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_executor_command_rejected() {
        let mut config = GlobalConfig::default();
        config.executors.insert("broken".to_string(), ExecutorConfig::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_paths() {
        let config = GlobalConfig {
            storage: StorageConfig {
                data_dir: PathBuf::from("/var/lib/harvestr"),
            },
            ..Default::default()
        };
        assert_eq!(config.job_log_dir(), PathBuf::from("/var/lib/harvestr/logs/jobs"));
        assert_eq!(config.snapshot_path(), PathBuf::from("/var/lib/harvestr/status.json"));
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
scheduler:
  concurrency: 2
  interval-secs: 3600
runner:
  block-patterns: ["captcha"]
catalog:
  jobs:
    - id: autoscout
      name: AutoScout24
      source: autoscout24.de
      executor: autoscout
      implemented: true
  discovery:
    - /etc/harvestr/discovered/*.yml
executors:
  autoscout:
    command: node
    args: ["scrapers/autoscout.js", "{source}"]
fallback-executor:
  command: node
  args: ["scrapers/generic.js", "{source}"]
"#;
        let config: GlobalConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.scheduler.concurrency, 2);
        assert_eq!(config.scheduler.interval_secs, 3600);
        assert_eq!(config.runner.block_patterns, vec!["captcha".to_string()]);
        assert_eq!(config.catalog.jobs.len(), 1);
        assert!(config.catalog.jobs[0].implemented);
        assert_eq!(config.executors["autoscout"].args[1], "{source}");
        assert!(config.fallback_executor.is_some());
        // Other fields should have defaults
        assert_eq!(config.runner.specialized_timeout_secs, 900);
        assert_eq!(config.scheduler.history_capacity, 100);
    }
}
