//! Time-window rollback data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Restore plan for one device back to a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub plan_id: String,
    pub device_id: String,
    pub target_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// One step per distinct file changed after `target_time`.
    pub steps: Vec<RollbackStep>,
    pub warnings: Vec<String>,
    pub can_execute: bool,
    pub estimated_duration_secs: u64,
}

/// What a step does to its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackStepAction {
    /// Write `to_snapshot_id`'s content back.
    Restore,
    /// No version exists before the target time; remove the file.
    Delete,
}

/// A single file's restore step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackStep {
    pub file_path: String,
    pub action: RollbackStepAction,
    /// Latest snapshot after the target time (the state being undone).
    pub from_snapshot_id: String,
    /// Latest snapshot before the target time, `None` means delete.
    pub to_snapshot_id: Option<String>,
    /// Number of recorded changes being undone.
    pub changes_undone: usize,
    pub description: String,
}

/// Per-step execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Outcome of one executed (or validated) step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackStepResult {
    pub file_path: String,
    pub action: RollbackStepAction,
    pub status: StepStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of executing a rollback plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackExecutionResult {
    pub plan_id: String,
    pub device_id: String,
    pub dry_run: bool,
    pub step_results: Vec<RollbackStepResult>,
    pub successful_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    pub overall_success: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RollbackExecutionResult {
    /// Build the result and its aggregate counts from step outcomes.
    pub fn from_steps(
        plan: &RollbackPlan,
        dry_run: bool,
        step_results: Vec<RollbackStepResult>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let count = |status| step_results.iter().filter(|r| r.status == status).count();
        let successful_steps = count(StepStatus::Succeeded);
        let failed_steps = count(StepStatus::Failed);
        let skipped_steps = count(StepStatus::Skipped);

        Self {
            plan_id: plan.plan_id.clone(),
            device_id: plan.device_id.clone(),
            dry_run,
            overall_success: failed_steps == 0 && skipped_steps == 0,
            step_results,
            successful_steps,
            failed_steps,
            skipped_steps,
            started_at,
            completed_at: Utc::now(),
        }
    }
}

/// A change event in the history, as seen by candidate clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub snapshot_id: String,
    pub device_id: String,
    pub file_path: String,
    pub config_type: String,
    pub changed_at: DateTime<Utc>,
}

/// A cluster of nearby changes offered as a rollback suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackCandidate {
    pub device_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub span_secs: i64,
    pub event_count: usize,
    pub file_count: usize,
    pub files: Vec<String>,
    pub config_types: Vec<String>,
    /// Pass this as `target_time` to undo the whole cluster.
    pub rollback_target: DateTime<Utc>,
    pub description: String,
}
