use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::scheduler::{ConcurrencyConfig, ModeConfig, PriorityConfig, RetryConfig};
use crate::storage::PersistenceConfig;
use crate::worker::WorkerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// env_logger filter used when RUST_LOG is not set
    pub log_level: Option<String>,
    pub scheduler: SchedulerConfig,
    pub retry: RetryConfig,
    pub worker: WorkerConfig,
    pub priority: PriorityConfig,
    pub mode: ModeConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(flatten)]
    pub concurrency: ConcurrencyConfig,
    pub poll_interval_ms: u64,
    pub completion_feed_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyConfig::default(),
            poll_interval_ms: 100,
            completion_feed_capacity: 256,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            worker: WorkerConfig::default(),
            priority: PriorityConfig::default(),
            mode: ModeConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Config {
    /// Defaults with persistence turned off, for embedding and tests.
    pub fn in_memory() -> Self {
        Self {
            persistence: PersistenceConfig::disabled(),
            ..Self::default()
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.scheduler.concurrency.max_workers = max_workers;
        self
    }

    /// Log filter for the binary: `log_level`, or "info" when unset.
    pub fn log_filter(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.concurrency.max_workers == 0 {
            eyre::bail!("scheduler.max_workers must be at least 1");
        }
        if self.scheduler.concurrency.interactive_workers == 0 {
            eyre::bail!("scheduler.interactive_workers must be at least 1");
        }
        if self.scheduler.poll_interval_ms == 0 {
            eyre::bail!("scheduler.poll_interval_ms must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.priority.hint_weight) {
            eyre::bail!("priority.hint_weight must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.priority.default_score) {
            eyre::bail!("priority.default_score must be within [0, 1]");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            eyre::bail!("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }
        Ok(())
    }
}
