//! Snapshot data model.

use crate::utils::hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pre-change state of one file on one device.
///
/// Written once per (transaction, device, file) and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub content: String,
    pub content_hash: String,
    pub file_size: u64,
    /// False when the file did not exist before deployment.
    pub existed: bool,
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Snapshot of an existing file.
    pub fn existing(content: String) -> Self {
        Self {
            content_hash: hash::sha256_str(&content),
            file_size: content.len() as u64,
            content,
            existed: true,
            captured_at: Utc::now(),
        }
    }

    /// Snapshot of a file that was absent.
    pub fn absent() -> Self {
        Self {
            content: String::new(),
            content_hash: hash::sha256_str(""),
            file_size: 0,
            existed: false,
            captured_at: Utc::now(),
        }
    }
}

/// Outcome of capturing one file's snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotCaptureResult {
    Captured(Snapshot),
    /// Capture failed; the file cannot be restored by in-batch rollback.
    Skipped {
        reason: String,
    },
}

/// A file whose snapshot could not be captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSnapshot {
    pub device_id: String,
    pub file_path: String,
    pub reason: String,
}

/// Why a record was written to the snapshot store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    /// Pre-deployment content seen for the first time.
    Baseline,
    /// Content written by a deployment.
    Deployment,
    /// Content written back by a rollback.
    Rollback,
}

/// Append-only history record in the snapshot store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub snapshot_id: String,
    pub device_id: String,
    pub file_path: String,
    pub content: String,
    pub content_hash: String,
    pub file_size: u64,
    pub config_type: String,
    pub source: SnapshotSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SnapshotRecord {
    pub fn new(device_id: &str, file_path: &str, content: &str, source: SnapshotSource) -> Self {
        Self {
            snapshot_id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            file_path: file_path.to_string(),
            content: content.to_string(),
            content_hash: hash::sha256_str(content),
            file_size: content.len() as u64,
            config_type: crate::utils::fs::config_type(file_path),
            source,
            batch_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_batch(mut self, batch_id: &str) -> Self {
        self.batch_id = Some(batch_id.to_string());
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existing_snapshot_hash() {
        let snap = Snapshot::existing("listen 80;\n".to_string());
        assert!(snap.existed);
        assert_eq!(snap.file_size, 11);
        assert_eq!(snap.content_hash, hash::sha256_str("listen 80;\n"));
    }

    #[test]
    fn test_absent_snapshot() {
        let snap = Snapshot::absent();
        assert!(!snap.existed);
        assert!(snap.content.is_empty());
        assert_eq!(snap.file_size, 0);
    }

    #[test]
    fn test_record_config_type() {
        let record = SnapshotRecord::new("d1", "/etc/app.yaml", "a: 1", SnapshotSource::Deployment)
            .with_batch("b1");
        assert_eq!(record.config_type, "yaml");
        assert_eq!(record.batch_id.as_deref(), Some("b1"));
    }
}
