//! In-batch rollback.
//!
//! Reverts every written change of one transaction from its captured
//! snapshots, including changes that failed verification after the rename:
//! - existed before: write the original content back
//! - did not exist: delete the file
//! - snapshot skipped: nothing to restore, recorded as failed
//!
//! Every step is attempted and recorded independently.

use super::executor::DeploymentExecutor;
use super::files::Connections;
use crate::models::snapshot::{SnapshotRecord, SnapshotSource};
use crate::models::transaction::{
    AppliedChange, BatchTransaction, RevertAction, RollbackEntry, RollbackStepStatus,
};
use crate::services::store::SnapshotStore;
use chrono::Utc;
use std::sync::Arc;

/// Rollback executor.
pub struct RollbackExecutor {
    executor: DeploymentExecutor,
    /// Where `rollback` history records go, when recording is on.
    history: Option<Arc<dyn SnapshotStore>>,
}

impl RollbackExecutor {
    pub fn new(executor: DeploymentExecutor, history: Option<Arc<dyn SnapshotStore>>) -> Self {
        Self { executor, history }
    }

    /// Revert every written change of `txn`, newest first.
    pub async fn revert(
        &self,
        txn: &BatchTransaction,
        connections: &mut Connections,
    ) -> Vec<RollbackEntry> {
        let mut entries = Vec::with_capacity(txn.written_changes.len());

        for applied in txn.written_changes.iter().rev() {
            let entry = self.revert_one(txn, applied, connections).await;
            match entry.status {
                RollbackStepStatus::RolledBack => tracing::info!(
                    batch_id = %txn.batch_id,
                    device_id = %entry.device_id,
                    file_path = %entry.file_path,
                    action = ?entry.action,
                    "Rolled back"
                ),
                RollbackStepStatus::RollbackFailed => tracing::error!(
                    batch_id = %txn.batch_id,
                    device_id = %entry.device_id,
                    file_path = %entry.file_path,
                    "Rollback failed: {}",
                    entry.error.as_deref().unwrap_or("unknown error")
                ),
            }
            entries.push(entry);
        }

        entries
    }

    async fn revert_one(
        &self,
        txn: &BatchTransaction,
        applied: &AppliedChange,
        connections: &mut Connections,
    ) -> RollbackEntry {
        let mut entry = RollbackEntry {
            device_id: applied.device_id.clone(),
            file_path: applied.file_path.clone(),
            change_id: applied.change_id.clone(),
            action: RevertAction::Unrecoverable,
            status: RollbackStepStatus::RollbackFailed,
            error: None,
            attempted_at: Utc::now(),
        };

        let snapshot = match txn.snapshot(&applied.device_id, &applied.file_path) {
            Some(snapshot) => snapshot,
            None => {
                let reason = txn
                    .skip_reason(&applied.device_id, &applied.file_path)
                    .unwrap_or("not captured");
                entry.error = Some(format!("no snapshot available: {}", reason));
                return entry;
            }
        };
        entry.action = if snapshot.existed {
            RevertAction::Restore
        } else {
            RevertAction::Delete
        };

        let conn = match connections.get(&applied.device_id).await {
            Ok(conn) => conn,
            Err(e) => {
                entry.error = Some(e);
                return entry;
            }
        };

        let result = if snapshot.existed {
            self.executor
                .write(conn, &applied.file_path, &snapshot.content)
                .await
                .map_err(|e| e.error)
        } else {
            self.executor.delete(conn, &applied.file_path).await
        };

        match result {
            Ok(()) => {
                entry.status = RollbackStepStatus::RolledBack;
                if snapshot.existed {
                    self.record_history(txn, applied, &snapshot.content).await;
                }
            }
            Err(e) => entry.error = Some(e.to_string()),
        }
        entry
    }

    async fn record_history(&self, txn: &BatchTransaction, applied: &AppliedChange, content: &str) {
        if let Some(ref store) = self.history {
            let record = SnapshotRecord::new(
                &applied.device_id,
                &applied.file_path,
                content,
                SnapshotSource::Rollback,
            )
            .with_batch(&txn.batch_id);
            if let Err(e) = store.append(record).await {
                tracing::warn!(batch_id = %txn.batch_id, "Failed to record rollback history: {}", e);
            }
        }
    }
}
