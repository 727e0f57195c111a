//! Configuration model.
//!
//! Loaded from `~/.config/config_deploy/config.toml` unless a path is given.
//! Environment variables override a few values:
//! - `CONFIG_DEPLOY_COMMAND_TIMEOUT`: per-command timeout in seconds
//! - `CONFIG_DEPLOY_SSH_USER`: SSH user name
//! - `CONFIG_DEPLOY_DATA_DIR`: snapshot store and reports directory

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Ten years; longer rollback horizons are rejected.
const MAX_ROLLBACK_AGE_HOURS: i64 = 24 * 365 * 10;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub deployment: DeploymentConfig,
    pub rollback: RollbackConfig,
    pub registry: RegistryConfig,
    pub ssh: SshConfig,
    pub storage: StorageConfig,
    /// Static device directory.
    pub devices: Vec<DeviceEntry>,
}

/// Batch deployment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Timeout for each remote command.
    pub command_timeout_secs: u64,
    /// Timeout for the connectivity probe during validation.
    pub probe_timeout_secs: u64,
    /// Overall bound on the execution phase, checked between steps.
    pub deployment_timeout_secs: u64,
    /// Read the remote hash back after every write.
    pub verify_checksum: bool,
    /// Append baseline/deployment/rollback records to the snapshot store.
    pub record_history: bool,
    /// Concurrent connectivity probes during validation.
    pub validation_concurrency: usize,
}

/// Time-window rollback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    /// Oldest accepted target time, in hours before now.
    pub max_age_hours: i64,
    /// Largest accepted plan, in files.
    pub max_files: usize,
    /// Gap that separates two rollback candidates.
    pub rollback_window_minutes: i64,
    /// Used for `estimated_duration_secs`.
    pub seconds_per_step_estimate: u64,
}

/// Transaction registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Transactions are evicted this long after registration.
    pub cleanup_delay_secs: u64,
    pub sweep_interval_secs: u64,
}

/// SSH transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: Option<String>,
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub extra_args: Vec<String>,
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// One device known to the static directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub hostname: String,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 30,
            probe_timeout_secs: 10,
            deployment_timeout_secs: 1800,
            verify_checksum: true,
            record_history: true,
            validation_concurrency: 4,
        }
    }
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            max_age_hours: 720,
            max_files: 50,
            rollback_window_minutes: 5,
            seconds_per_step_estimate: 3,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cleanup_delay_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: None,
            port: 22,
            connect_timeout_secs: 10,
            extra_args: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("config_deploy"),
        }
    }
}

impl Config {
    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        if let Some(secs) = std::env::var("CONFIG_DEPLOY_COMMAND_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.deployment.command_timeout_secs = secs;
        }
        if let Ok(user) = std::env::var("CONFIG_DEPLOY_SSH_USER") {
            self.ssh.user = Some(user);
        }
        if let Ok(dir) = std::env::var("CONFIG_DEPLOY_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.deployment.command_timeout_secs == 0 {
            return Err(crate::Error::Settings(
                "deployment.command_timeout_secs must be positive".to_string(),
            ));
        }
        if self.deployment.validation_concurrency == 0 {
            return Err(crate::Error::Settings(
                "deployment.validation_concurrency must be positive".to_string(),
            ));
        }
        if self.rollback.max_age_hours <= 0 || self.rollback.max_files == 0 {
            return Err(crate::Error::Settings(
                "rollback.max_age_hours and rollback.max_files must be positive".to_string(),
            ));
        }
        if self.rollback.max_age_hours > MAX_ROLLBACK_AGE_HOURS {
            return Err(crate::Error::Settings(format!(
                "rollback.max_age_hours must be at most {}",
                MAX_ROLLBACK_AGE_HOURS
            )));
        }
        if self.rollback.rollback_window_minutes < 0
            || self.rollback.rollback_window_minutes > MAX_ROLLBACK_AGE_HOURS * 60
        {
            return Err(crate::Error::Settings(format!(
                "rollback.rollback_window_minutes must be between 0 and {}",
                MAX_ROLLBACK_AGE_HOURS * 60
            )));
        }
        Ok(())
    }

    /// Directory for saved batch reports.
    pub fn sessions_dir(&self) -> PathBuf {
        self.storage.data_dir.join("sessions")
    }

    /// Snapshot store file.
    pub fn snapshot_store_path(&self) -> PathBuf {
        self.storage.data_dir.join("snapshots.jsonl")
    }
}

/// Get the configuration directory path.
fn dirs_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config_deploy")
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    dirs_config_path().join("config.toml")
}

/// Load configuration from `path`, or from the default location.
///
/// A missing default file yields the defaults; a missing explicit file is an
/// error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let (config_path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path(), false),
    };

    let mut config = if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        toml::from_str(&content)?
    } else if explicit {
        return Err(crate::Error::Settings(format!(
            "config file not found: {}",
            config_path.display()
        )));
    } else {
        Config::default()
    };

    config.apply_env();
    config.validate()?;
    tracing::debug!("Loaded config from {:?}", config_path);
    Ok(config)
}
