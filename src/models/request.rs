//! Deployment request model.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Free-form key/value metadata carried through untouched.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// One configuration file to push, with its full new content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationFileChange {
    /// Caller-supplied identifier.
    pub change_id: String,
    /// Absolute path on the device.
    pub file_path: String,
    /// Full new file body.
    pub content: String,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl ConfigurationFileChange {
    pub fn new(change_id: &str, file_path: &str, content: &str) -> Self {
        Self {
            change_id: change_id.to_string(),
            file_path: file_path.to_string(),
            content: content.to_string(),
            metadata: Metadata::new(),
        }
    }
}

/// A request to push a set of changes to a set of devices as one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDeploymentRequest {
    /// Target devices.
    pub device_ids: Vec<String>,
    /// Changes, applied in this order on every device.
    pub changes: Vec<ConfigurationFileChange>,
    /// Validate and preview only.
    #[serde(default)]
    pub dry_run: bool,
    /// Revert applied changes when the batch does not fully succeed.
    #[serde(default = "default_auto_rollback")]
    pub auto_rollback: bool,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_auto_rollback() -> bool {
    true
}

impl BatchDeploymentRequest {
    pub fn new(device_ids: Vec<String>, changes: Vec<ConfigurationFileChange>) -> Self {
        Self {
            device_ids,
            changes,
            dry_run: false,
            auto_rollback: true,
            metadata: Metadata::new(),
        }
    }

    /// Structural checks done at the request boundary, before any
    /// transaction exists.
    pub fn check(&self) -> crate::Result<()> {
        let mut problems = Vec::new();

        if self.device_ids.is_empty() {
            problems.push("device_ids must not be empty".to_string());
        }
        if self.device_ids.iter().any(|id| id.trim().is_empty()) {
            problems.push("device_ids must not contain blank ids".to_string());
        }
        if self.changes.is_empty() {
            problems.push("changes must not be empty".to_string());
        }

        let mut seen = HashSet::new();
        for change in &self.changes {
            if !change.change_id.is_empty() && !seen.insert(change.change_id.as_str()) {
                problems.push(format!("duplicate change_id: {}", change.change_id));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::Validation(problems.join("; ")))
        }
    }

    /// Device ids with duplicates removed, first occurrence wins.
    pub fn unique_device_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.device_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }
}
