//! Batch transaction model and its state machine.

use super::request::{BatchDeploymentRequest, ConfigurationFileChange, Metadata};
use super::snapshot::{SkippedSnapshot, Snapshot};
use crate::preflight::ValidationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Transaction status.
///
/// ```text
/// initialized -> validated -> executing -> completed | partially_completed | failed
/// initialized -> validation_failed
/// failed | partially_completed -> rolled_back
/// initialized | validated | executing -> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Initialized,
    Validated,
    Executing,
    Completed,
    PartiallyCompleted,
    Failed,
    ValidationFailed,
    RolledBack,
    Cancelled,
}

impl TransactionStatus {
    /// Whether the attempt has reached an outcome.
    ///
    /// `Failed` and `PartiallyCompleted` are outcomes, but may still move to
    /// `RolledBack`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::PartiallyCompleted
                | Self::Failed
                | Self::ValidationFailed
                | Self::RolledBack
                | Self::Cancelled
        )
    }

    /// The only legal edges of the state machine.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Initialized, Validated)
                | (Initialized, ValidationFailed)
                | (Initialized, Failed)
                | (Initialized, Cancelled)
                | (Validated, Executing)
                | (Validated, Failed)
                | (Validated, Cancelled)
                | (Executing, Completed)
                | (Executing, PartiallyCompleted)
                | (Executing, Failed)
                | (Executing, Cancelled)
                | (Failed, RolledBack)
                | (PartiallyCompleted, RolledBack)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Validated => "validated",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Failed => "failed",
            Self::ValidationFailed => "validation_failed",
            Self::RolledBack => "rolled_back",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A change that was written to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub device_id: String,
    pub file_path: String,
    pub change_id: String,
    pub applied_at: DateTime<Utc>,
}

/// A change that did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedChange {
    pub device_id: String,
    pub file_path: String,
    pub change_id: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    /// The new content reached the target before the failure (a failed
    /// verification). Otherwise the target was never touched.
    #[serde(default)]
    pub committed: bool,
}

/// How an applied change is undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevertAction {
    /// Write the original content back.
    Restore,
    /// The file did not exist before; remove it.
    Delete,
    /// No snapshot is available.
    Unrecoverable,
}

/// Outcome of reverting one applied change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStepStatus {
    RolledBack,
    RollbackFailed,
}

/// One entry of the in-batch rollback plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub device_id: String,
    pub file_path: String,
    pub change_id: String,
    pub action: RevertAction,
    pub status: RollbackStepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

/// Dry-run preview of one file on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePreview {
    pub device_id: String,
    pub file_path: String,
    pub change_id: String,
    pub existed: bool,
    pub changed: bool,
    pub diff: String,
}

/// The aggregate root of one deployment attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTransaction {
    pub batch_id: String,
    pub status: TransactionStatus,
    pub created_by: String,
    pub dry_run: bool,
    pub auto_rollback: bool,
    pub device_ids: Vec<String>,
    pub changes: Vec<ConfigurationFileChange>,
    #[serde(default)]
    pub metadata: Metadata,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub applied_changes: Vec<AppliedChange>,
    pub failed_changes: Vec<FailedChange>,
    /// Every change whose content reached its target, in write order. This
    /// is what in-batch rollback reverts.
    #[serde(default)]
    pub written_changes: Vec<AppliedChange>,
    pub rollback_plan: Vec<RollbackEntry>,
    pub validation_results: BTreeMap<String, ValidationResult>,
    /// device_id -> file_path -> snapshot
    #[serde(skip)]
    pub original_snapshots: BTreeMap<String, BTreeMap<String, Snapshot>>,
    pub skipped_snapshots: Vec<SkippedSnapshot>,
    pub previews: Vec<ChangePreview>,
    pub history: Vec<StatusTransition>,
    pub cancelled_by: Option<String>,
}

impl BatchTransaction {
    /// Create a transaction for a request that passed the boundary checks.
    pub fn new(request: &BatchDeploymentRequest, actor: &str) -> Self {
        Self {
            batch_id: format!("batch-{}", Uuid::new_v4()),
            status: TransactionStatus::Initialized,
            created_by: actor.to_string(),
            dry_run: request.dry_run,
            auto_rollback: request.auto_rollback,
            device_ids: request.unique_device_ids(),
            changes: request.changes.clone(),
            metadata: request.metadata.clone(),
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            applied_changes: Vec::new(),
            failed_changes: Vec::new(),
            written_changes: Vec::new(),
            rollback_plan: Vec::new(),
            validation_results: BTreeMap::new(),
            original_snapshots: BTreeMap::new(),
            skipped_snapshots: Vec::new(),
            previews: Vec::new(),
            history: Vec::new(),
            cancelled_by: None,
        }
    }

    /// Move to `next`, refusing any edge the state machine does not define.
    pub fn transition(
        &mut self,
        next: TransactionStatus,
        reason: Option<&str>,
    ) -> crate::Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(crate::Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        self.history.push(StatusTransition {
            from: self.status,
            to: next,
            at: now,
            reason: reason.map(str::to_string),
        });
        tracing::debug!(batch_id = %self.batch_id, from = %self.status, to = %next, "status transition");
        self.status = next;

        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Status implied by the applied/failed bookkeeping after execution.
    pub fn execution_outcome(&self) -> TransactionStatus {
        match (self.applied_changes.len(), self.failed_changes.len()) {
            (_, 0) => TransactionStatus::Completed,
            (0, _) => TransactionStatus::Failed,
            _ => TransactionStatus::PartiallyCompleted,
        }
    }

    pub fn record_applied(&mut self, device_id: &str, change: &ConfigurationFileChange) {
        let applied = AppliedChange {
            device_id: device_id.to_string(),
            file_path: change.file_path.clone(),
            change_id: change.change_id.clone(),
            applied_at: Utc::now(),
        };
        self.written_changes.push(applied.clone());
        self.applied_changes.push(applied);
    }

    /// Record a failure. `committed` failures still count as written.
    pub fn record_failed(
        &mut self,
        device_id: &str,
        change: &ConfigurationFileChange,
        error: &str,
        committed: bool,
    ) {
        let failed_at = Utc::now();
        if committed {
            self.written_changes.push(AppliedChange {
                device_id: device_id.to_string(),
                file_path: change.file_path.clone(),
                change_id: change.change_id.clone(),
                applied_at: failed_at,
            });
        }
        self.failed_changes.push(FailedChange {
            device_id: device_id.to_string(),
            file_path: change.file_path.clone(),
            change_id: change.change_id.clone(),
            error: error.to_string(),
            failed_at,
            committed,
        });
    }

    /// Store a captured snapshot. The first capture for a file wins.
    pub fn store_snapshot(&mut self, device_id: &str, file_path: &str, snapshot: Snapshot) {
        self.original_snapshots
            .entry(device_id.to_string())
            .or_default()
            .entry(file_path.to_string())
            .or_insert(snapshot);
    }

    pub fn snapshot(&self, device_id: &str, file_path: &str) -> Option<&Snapshot> {
        self.original_snapshots.get(device_id)?.get(file_path)
    }

    /// Why a snapshot is missing, if its capture was skipped.
    pub fn skip_reason(&self, device_id: &str, file_path: &str) -> Option<&str> {
        self.skipped_snapshots
            .iter()
            .find(|s| s.device_id == device_id && s.file_path == file_path)
            .map(|s| s.reason.as_str())
    }

    pub fn targets_device(&self, device_id: &str) -> bool {
        self.device_ids.iter().any(|d| d == device_id)
    }
}

/// What callers get back from every manager operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDeploymentResponse {
    pub batch_id: String,
    pub status: TransactionStatus,
    pub dry_run: bool,
    pub auto_rollback: bool,
    pub created_by: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub device_count: usize,
    pub change_count: usize,
    pub applied_changes: Vec<AppliedChange>,
    pub failed_changes: Vec<FailedChange>,
    pub rollback_plan: Vec<RollbackEntry>,
    pub validation_results: BTreeMap<String, ValidationResult>,
    pub skipped_snapshots: Vec<SkippedSnapshot>,
    pub previews: Vec<ChangePreview>,
    pub history: Vec<StatusTransition>,
}

impl BatchDeploymentResponse {
    pub fn is_success(&self) -> bool {
        matches!(self.status, TransactionStatus::Completed)
            || (self.dry_run && self.status == TransactionStatus::Validated)
    }

    /// Rollback entries that could not be restored.
    pub fn unrecovered(&self) -> impl Iterator<Item = &RollbackEntry> {
        self.rollback_plan
            .iter()
            .filter(|e| e.status == RollbackStepStatus::RollbackFailed)
    }
}

impl From<&BatchTransaction> for BatchDeploymentResponse {
    fn from(txn: &BatchTransaction) -> Self {
        Self {
            batch_id: txn.batch_id.clone(),
            status: txn.status,
            dry_run: txn.dry_run,
            auto_rollback: txn.auto_rollback,
            created_by: txn.created_by.clone(),
            started_at: txn.started_at,
            completed_at: txn.completed_at,
            error_message: txn.error_message.clone(),
            device_count: txn.device_ids.len(),
            change_count: txn.changes.len(),
            applied_changes: txn.applied_changes.clone(),
            failed_changes: txn.failed_changes.clone(),
            rollback_plan: txn.rollback_plan.clone(),
            validation_results: txn.validation_results.clone(),
            skipped_snapshots: txn.skipped_snapshots.clone(),
            previews: txn.previews.clone(),
            history: txn.history.clone(),
        }
    }
}

/// Compact listing entry for registry queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub batch_id: String,
    pub status: TransactionStatus,
    pub created_by: String,
    pub dry_run: bool,
    pub device_ids: Vec<String>,
    pub applied_count: usize,
    pub failed_count: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&BatchTransaction> for TransactionSummary {
    fn from(txn: &BatchTransaction) -> Self {
        Self {
            batch_id: txn.batch_id.clone(),
            status: txn.status,
            created_by: txn.created_by.clone(),
            dry_run: txn.dry_run,
            device_ids: txn.device_ids.clone(),
            applied_count: txn.applied_changes.len(),
            failed_count: txn.failed_changes.len(),
            started_at: txn.started_at,
            completed_at: txn.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionStatus::*;

    const ALL: [TransactionStatus; 9] = [
        Initialized,
        Validated,
        Executing,
        Completed,
        PartiallyCompleted,
        Failed,
        ValidationFailed,
        RolledBack,
        Cancelled,
    ];

    fn txn() -> BatchTransaction {
        let request = BatchDeploymentRequest::new(
            vec!["dev-a".to_string()],
            vec![ConfigurationFileChange::new("c1", "/etc/a.conf", "a")],
        );
        BatchTransaction::new(&request, "tester")
    }

    #[test]
    fn test_no_edges_out_of_final_states() {
        for from in [Completed, ValidationFailed, RolledBack, Cancelled] {
            for to in ALL {
                assert!(
                    !from.can_transition_to(to),
                    "{} -> {} must be illegal",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_rolled_back_only_from_failure_outcomes() {
        let sources: Vec<_> = ALL
            .iter()
            .filter(|s| s.can_transition_to(RolledBack))
            .collect();
        assert_eq!(sources, vec![&PartiallyCompleted, &Failed]);
    }

    #[test]
    fn test_completed_never_returns_to_executing() {
        let mut t = txn();
        t.transition(Validated, None).unwrap();
        t.transition(Executing, None).unwrap();
        t.transition(Completed, None).unwrap();
        assert!(t.completed_at.is_some());

        let err = t.transition(Executing, None).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidTransition { .. }));
        assert_eq!(t.status, Completed);
        assert_eq!(t.history.len(), 3);
    }

    #[test]
    fn test_execution_outcome() {
        let mut t = txn();
        let change = t.changes[0].clone();
        assert_eq!(t.execution_outcome(), Completed);

        t.record_failed("dev-a", &change, "boom", false);
        assert_eq!(t.execution_outcome(), Failed);

        t.record_applied("dev-b", &change);
        assert_eq!(t.execution_outcome(), PartiallyCompleted);
    }

    #[test]
    fn test_committed_failure_is_written() {
        let mut t = txn();
        let change = t.changes[0].clone();
        t.record_applied("dev-a", &change);
        t.record_failed("dev-b", &change, "rename failed", false);
        t.record_failed("dev-c", &change, "checksum mismatch", true);

        let written: Vec<&str> = t
            .written_changes
            .iter()
            .map(|w| w.device_id.as_str())
            .collect();
        assert_eq!(written, vec!["dev-a", "dev-c"]);
        assert_eq!(t.applied_changes.len(), 1);
        assert!(t.failed_changes[1].committed);
    }

    #[test]
    fn test_first_snapshot_wins() {
        let mut t = txn();
        t.store_snapshot("dev-a", "/etc/a.conf", Snapshot::existing("old".into()));
        t.store_snapshot("dev-a", "/etc/a.conf", Snapshot::existing("new".into()));
        assert_eq!(t.snapshot("dev-a", "/etc/a.conf").unwrap().content, "old");
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&PartiallyCompleted).unwrap();
        assert_eq!(json, "\"partially_completed\"");
        assert_eq!(PartiallyCompleted.to_string(), "partially_completed");
    }
}
