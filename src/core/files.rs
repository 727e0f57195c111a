//! File operations on one device.
//!
//! Every write goes through [`DeviceFiles::write_atomic`]: parent directory,
//! temp sibling, rename. Readers of the target never see a partial file.

use crate::services::devices::DeviceDirectory;
use crate::services::remote::{RemoteClient, RemoteCommand, RemoteConnection, NOT_FOUND_EXIT};
use crate::utils::{fs, hash};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// File operations over an open connection.
pub struct DeviceFiles<'a> {
    conn: &'a dyn RemoteConnection,
    timeout: Duration,
}

impl<'a> DeviceFiles<'a> {
    pub fn new(conn: &'a dyn RemoteConnection, timeout: Duration) -> Self {
        Self { conn, timeout }
    }

    async fn run(&self, command: RemoteCommand) -> Result<String> {
        let output = self.conn.execute(&command, self.timeout).await?;
        Ok(output.into_result(&command)?.stdout)
    }

    /// Current content, or `None` when the file does not exist.
    pub async fn read(&self, path: &str) -> Result<Option<String>> {
        let command = RemoteCommand::ReadFile {
            path: path.to_string(),
        };
        let output = self.conn.execute(&command, self.timeout).await?;
        if output.exit_status == NOT_FOUND_EXIT {
            return Ok(None);
        }
        Ok(Some(output.into_result(&command)?.stdout))
    }

    /// Replace `path` with `content` through a temp file and a rename.
    pub async fn write_atomic(&self, path: &str, content: &str) -> Result<()> {
        self.run(RemoteCommand::MakeParentDirs {
            path: path.to_string(),
        })
        .await?;

        let temp_path = fs::temp_sibling_path(path);
        if let Err(e) = self
            .run(RemoteCommand::WriteTemp {
                temp_path: temp_path.clone(),
                content: content.to_string(),
            })
            .await
        {
            self.discard(&temp_path).await;
            return Err(e);
        }

        if let Err(e) = self
            .run(RemoteCommand::Rename {
                from: temp_path.clone(),
                to: path.to_string(),
            })
            .await
        {
            self.discard(&temp_path).await;
            return Err(e);
        }
        Ok(())
    }

    /// Best-effort removal of a leftover temp file.
    async fn discard(&self, temp_path: &str) {
        if let Err(e) = self.remove(temp_path).await {
            tracing::warn!(
                host = self.conn.hostname(),
                "Failed to remove temp file {}: {}",
                temp_path,
                e
            );
        }
    }

    pub async fn remove(&self, path: &str) -> Result<()> {
        self.run(RemoteCommand::RemoveFile {
            path: path.to_string(),
        })
        .await
        .map(|_| ())
    }

    /// Remote SHA-256 of `path`.
    pub async fn hash(&self, path: &str) -> Result<String> {
        let stdout = self
            .run(RemoteCommand::HashFile {
                path: path.to_string(),
            })
            .await?;
        hash::parse_sha256(&stdout).ok_or_else(|| {
            crate::Error::Configuration(format!("unreadable hash output for {}", path))
        })
    }

    /// Fail with `Configuration` when the remote hash differs from `expected`.
    pub async fn verify(&self, path: &str, expected: &str) -> Result<()> {
        let actual = self.hash(path).await?;
        if actual != expected {
            return Err(crate::Error::Configuration(format!(
                "checksum mismatch for {}: expected {}, found {}",
                path, expected, actual
            )));
        }
        Ok(())
    }
}

/// Lazily opened connections to the devices of one operation.
///
/// A failed connection is remembered so the device is not retried for every
/// file.
pub struct Connections {
    remote: Arc<dyn RemoteClient>,
    devices: Arc<dyn DeviceDirectory>,
    open: HashMap<String, std::result::Result<Box<dyn RemoteConnection>, String>>,
}

impl Connections {
    pub fn new(remote: Arc<dyn RemoteClient>, devices: Arc<dyn DeviceDirectory>) -> Self {
        Self {
            remote,
            devices,
            open: HashMap::new(),
        }
    }

    /// Connection to `device_id`, connecting on first use.
    pub async fn get(
        &mut self,
        device_id: &str,
    ) -> std::result::Result<&dyn RemoteConnection, String> {
        if !self.open.contains_key(device_id) {
            let attempt = match self.devices.get_device(device_id).await {
                Ok(device) => self
                    .remote
                    .connect(&device.hostname)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(ref e) = attempt {
                tracing::warn!(device_id, "Connection failed: {}", e);
            }
            self.open.insert(device_id.to_string(), attempt);
        }

        match self.open.get(device_id) {
            Some(Ok(conn)) => Ok(conn.as_ref()),
            Some(Err(e)) => Err(e.clone()),
            None => Err(format!("no connection to {}", device_id)),
        }
    }

    /// Disconnect everything that was opened.
    pub async fn close_all(&mut self) {
        for (device_id, conn) in self.open.drain() {
            if let Ok(conn) = conn {
                if let Err(e) = conn.disconnect().await {
                    tracing::debug!(device_id = %device_id, "Disconnect failed: {}", e);
                }
            }
        }
    }
}
