//! Snapshot store.
//!
//! Append-only history of file contents per device, queried by device, file
//! path and time range.

use crate::models::snapshot::SnapshotRecord;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Filter for [`SnapshotStore::query`]. Time bounds are exclusive.
#[derive(Debug, Clone, Default)]
pub struct SnapshotQuery {
    pub device_id: Option<String>,
    /// Empty means every file.
    pub file_paths: Vec<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl SnapshotQuery {
    pub fn device(device_id: &str) -> Self {
        Self {
            device_id: Some(device_id.to_string()),
            ..Default::default()
        }
    }

    pub fn files(mut self, file_paths: &[String]) -> Self {
        self.file_paths = file_paths.to_vec();
        self
    }

    pub fn after(mut self, time: DateTime<Utc>) -> Self {
        self.created_after = Some(time);
        self
    }

    pub fn before(mut self, time: DateTime<Utc>) -> Self {
        self.created_before = Some(time);
        self
    }

    pub fn matches(&self, record: &SnapshotRecord) -> bool {
        if let Some(ref device) = self.device_id {
            if &record.device_id != device {
                return false;
            }
        }
        if !self.file_paths.is_empty() && !self.file_paths.contains(&record.file_path) {
            return false;
        }
        if let Some(after) = self.created_after {
            if record.created_at <= after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if record.created_at >= before {
                return false;
            }
        }
        true
    }
}

/// Snapshot storage trait.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn append(&self, record: SnapshotRecord) -> Result<()>;

    async fn get(&self, snapshot_id: &str) -> Result<Option<SnapshotRecord>>;

    /// Matching records, oldest first.
    async fn query(&self, query: &SnapshotQuery) -> Result<Vec<SnapshotRecord>>;

    /// Whether any record exists for this device and file.
    async fn has_history(&self, device_id: &str, file_path: &str) -> Result<bool> {
        let query = SnapshotQuery {
            limit: Some(1),
            ..SnapshotQuery::device(device_id).files(&[file_path.to_string()])
        };
        Ok(!self.query(&query).await?.is_empty())
    }
}

fn select(records: &[SnapshotRecord], query: &SnapshotQuery) -> Vec<SnapshotRecord> {
    let mut matched: Vec<SnapshotRecord> = records
        .iter()
        .filter(|r| query.matches(r))
        .cloned()
        .collect();
    // Stable sort keeps append order for equal timestamps.
    matched.sort_by_key(|r| r.created_at);
    if let Some(limit) = query.limit {
        matched.truncate(limit);
    }
    matched
}

// ========== IN-MEMORY IMPLEMENTATION ==========

/// In-memory snapshot store for testing and embedding.
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStore {
    records: Arc<RwLock<Vec<SnapshotRecord>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn append(&self, record: SnapshotRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|e| crate::Error::other(format!("lock poisoned: {}", e)))?;
        records.push(record);
        Ok(())
    }

    async fn get(&self, snapshot_id: &str) -> Result<Option<SnapshotRecord>> {
        let records = self
            .records
            .read()
            .map_err(|e| crate::Error::other(format!("lock poisoned: {}", e)))?;
        Ok(records
            .iter()
            .find(|r| r.snapshot_id == snapshot_id)
            .cloned())
    }

    async fn query(&self, query: &SnapshotQuery) -> Result<Vec<SnapshotRecord>> {
        let records = self
            .records
            .read()
            .map_err(|e| crate::Error::other(format!("lock poisoned: {}", e)))?;
        Ok(select(&records, query))
    }
}

// ========== JSON-LINES IMPLEMENTATION ==========

/// Append-only JSON-lines file, loaded into memory on open.
#[derive(Debug)]
pub struct JsonLinesSnapshotStore {
    path: PathBuf,
    records: RwLock<Vec<SnapshotRecord>>,
}

impl JsonLinesSnapshotStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let mut records = Vec::new();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let mut seen = HashSet::new();
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<SnapshotRecord>(line) {
                    Ok(record) => {
                        if seen.insert(record.snapshot_id.clone()) {
                            records.push(record);
                        }
                    }
                    Err(e) => {
                        // A torn last line from a crash is skipped, not fatal.
                        tracing::warn!("Skipping bad record at {:?}:{}: {}", path, line_no + 1, e);
                    }
                }
            }
            if !content.is_empty() && !content.ends_with('\n') {
                // Terminate the torn line so the next append starts clean.
                let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
                writeln!(file)?;
            }
        } else if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::debug!(
            "Opened snapshot store {:?} with {} records",
            path,
            records.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for JsonLinesSnapshotStore {
    async fn append(&self, record: SnapshotRecord) -> Result<()> {
        let line = serde_json::to_string(&record)?;
        let mut records = self
            .records
            .write()
            .map_err(|e| crate::Error::other(format!("lock poisoned: {}", e)))?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;

        records.push(record);
        Ok(())
    }

    async fn get(&self, snapshot_id: &str) -> Result<Option<SnapshotRecord>> {
        let records = self
            .records
            .read()
            .map_err(|e| crate::Error::other(format!("lock poisoned: {}", e)))?;
        Ok(records
            .iter()
            .find(|r| r.snapshot_id == snapshot_id)
            .cloned())
    }

    async fn query(&self, query: &SnapshotQuery) -> Result<Vec<SnapshotRecord>> {
        let records = self
            .records
            .read()
            .map_err(|e| crate::Error::other(format!("lock poisoned: {}", e)))?;
        Ok(select(&records, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::snapshot::SnapshotSource;
    use chrono::Duration;

    fn record(device: &str, path: &str, minutes_ago: i64) -> SnapshotRecord {
        SnapshotRecord::new(device, path, "x", SnapshotSource::Deployment)
            .at(Utc::now() - Duration::minutes(minutes_ago))
    }

    #[tokio::test]
    async fn test_query_filters_and_sorts() {
        let store = InMemorySnapshotStore::new();
        store.append(record("d1", "/etc/a", 5)).await.unwrap();
        store.append(record("d1", "/etc/b", 30)).await.unwrap();
        store.append(record("d2", "/etc/a", 1)).await.unwrap();
        store.append(record("d1", "/etc/a", 60)).await.unwrap();

        let all = store.query(&SnapshotQuery::device("d1")).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        let only_a = store
            .query(&SnapshotQuery::device("d1").files(&["/etc/a".to_string()]))
            .await
            .unwrap();
        assert_eq!(only_a.len(), 2);
    }

    #[tokio::test]
    async fn test_time_bounds_are_exclusive() {
        let store = InMemorySnapshotStore::new();
        let pivot = Utc::now() - Duration::minutes(10);
        store.append(record("d1", "/etc/a", 20)).await.unwrap();
        store
            .append(SnapshotRecord::new("d1", "/etc/a", "p", SnapshotSource::Deployment).at(pivot))
            .await
            .unwrap();
        store.append(record("d1", "/etc/a", 2)).await.unwrap();

        let after = store
            .query(&SnapshotQuery::device("d1").after(pivot))
            .await
            .unwrap();
        let before = store
            .query(&SnapshotQuery::device("d1").before(pivot))
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(before.len(), 1);
    }

    #[tokio::test]
    async fn test_has_history() {
        let store = InMemorySnapshotStore::new();
        assert!(!store.has_history("d1", "/etc/a").await.unwrap());
        store.append(record("d1", "/etc/a", 1)).await.unwrap();
        assert!(store.has_history("d1", "/etc/a").await.unwrap());
        assert!(!store.has_history("d1", "/etc/b").await.unwrap());
    }
}
