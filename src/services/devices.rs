//! Device directory.

use crate::models::config::DeviceEntry;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A device that can be deployed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub hostname: String,
}

impl Device {
    pub fn new(id: &str, hostname: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            hostname: hostname.to_string(),
        }
    }
}

/// Resolves device ids to connection details.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Returns `ResourceNotFound` for unknown ids.
    async fn get_device(&self, device_id: &str) -> Result<Device>;
}

/// Fixed device list, usually from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    devices: HashMap<String, Device>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[DeviceEntry]) -> Self {
        let devices = entries
            .iter()
            .map(|e| {
                let device = Device {
                    id: e.id.clone(),
                    name: e.name.clone().unwrap_or_else(|| e.id.clone()),
                    hostname: e.hostname.clone(),
                };
                (e.id.clone(), device)
            })
            .collect();
        Self { devices }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.devices.insert(device.id.clone(), device);
        self
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[async_trait]
impl DeviceDirectory for StaticDirectory {
    async fn get_device(&self, device_id: &str) -> Result<Device> {
        self.devices
            .get(device_id)
            .cloned()
            .ok_or_else(|| crate::Error::ResourceNotFound(format!("device {}", device_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_entries_defaults_name_to_id() {
        let directory = StaticDirectory::from_entries(&[DeviceEntry {
            id: "edge-1".to_string(),
            name: None,
            hostname: "10.0.0.1".to_string(),
        }]);
        let device = directory.get_device("edge-1").await.unwrap();
        assert_eq!(device.name, "edge-1");
        assert_eq!(device.hostname, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let directory = StaticDirectory::new();
        let err = directory.get_device("nope").await.unwrap_err();
        assert!(matches!(err, crate::Error::ResourceNotFound(_)));
    }
}
