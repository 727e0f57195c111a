//! Deployment executor.
//!
//! Applies one file change to one device:
//! - write: parent directory, temp sibling, rename
//! - verify: read the remote hash back (optional)
//!
//! A verification failure happens after the rename, so [`WriteError`] tells
//! the caller whether the target already holds the new content.

use super::files::DeviceFiles;
use crate::models::config::DeploymentConfig;
use crate::models::request::ConfigurationFileChange;
use crate::services::remote::RemoteConnection;
use crate::utils::hash;
use crate::Result;
use std::time::Duration;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Timeout for each remote command.
    pub command_timeout: Duration,
    /// Whether to verify the remote checksum after every write.
    pub verify_checksum: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            verify_checksum: true,
        }
    }
}

impl From<&DeploymentConfig> for ExecutorConfig {
    fn from(config: &DeploymentConfig) -> Self {
        Self {
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            verify_checksum: config.verify_checksum,
        }
    }
}

/// A failed write.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct WriteError {
    /// The rename went through; the target holds the new content.
    pub committed: bool,
    pub error: crate::Error,
}

impl From<crate::Error> for WriteError {
    fn from(error: crate::Error) -> Self {
        Self {
            committed: false,
            error,
        }
    }
}

/// Deployment executor.
#[derive(Debug, Clone, Default)]
pub struct DeploymentExecutor {
    config: ExecutorConfig,
}

impl DeploymentExecutor {
    /// Create a new executor with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new executor with custom configuration.
    pub fn with_config(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// File operations on `conn` with this executor's timeout.
    pub fn files<'a>(&self, conn: &'a dyn RemoteConnection) -> DeviceFiles<'a> {
        DeviceFiles::new(conn, self.config.command_timeout)
    }

    /// Apply one change.
    pub async fn apply(
        &self,
        conn: &dyn RemoteConnection,
        change: &ConfigurationFileChange,
    ) -> std::result::Result<(), WriteError> {
        self.write(conn, &change.file_path, &change.content).await
    }

    /// Atomically write `content` to `path`, verifying it when configured.
    pub async fn write(
        &self,
        conn: &dyn RemoteConnection,
        path: &str,
        content: &str,
    ) -> std::result::Result<(), WriteError> {
        let files = self.files(conn);
        files.write_atomic(path, content).await?;
        if self.config.verify_checksum {
            files
                .verify(path, &hash::sha256_str(content))
                .await
                .map_err(|error| WriteError {
                    committed: true,
                    error,
                })?;
        }
        Ok(())
    }

    /// Remove `path`.
    pub async fn delete(&self, conn: &dyn RemoteConnection, path: &str) -> Result<()> {
        let files = self.files(conn);
        files.remove(path).await?;
        if self.config.verify_checksum && files.read(path).await?.is_some() {
            return Err(crate::Error::Configuration(format!(
                "{} still exists after removal",
                path
            )));
        }
        Ok(())
    }
}
