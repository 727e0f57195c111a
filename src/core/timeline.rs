//! Time-window rollback.
//!
//! Works on the snapshot store history rather than on a live transaction:
//! - plan: every file changed after a target time, restored to its last
//!   version before it (or deleted when there is none)
//! - execute: apply a plan through the same atomic write path as deployment
//! - candidates: cluster recent change events into rollback suggestions

use super::executor::{DeploymentExecutor, ExecutorConfig};
use super::files::Connections;
use crate::models::config::Config;
use crate::models::rollback::{
    ChangeEvent, RollbackCandidate, RollbackExecutionResult, RollbackPlan, RollbackStep,
    RollbackStepAction, RollbackStepResult, StepStatus,
};
use crate::models::snapshot::{SnapshotRecord, SnapshotSource};
use crate::services::devices::DeviceDirectory;
use crate::services::events::{self, EventSink};
use crate::services::remote::RemoteClient;
use crate::services::store::{SnapshotQuery, SnapshotStore};
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

/// Time-window rollback planner and executor.
pub struct TimelineRollback {
    remote: Arc<dyn RemoteClient>,
    devices: Arc<dyn DeviceDirectory>,
    store: Arc<dyn SnapshotStore>,
    events: Arc<dyn EventSink>,
    executor: DeploymentExecutor,
    max_age: Duration,
    max_files: usize,
    window: Duration,
    seconds_per_step: u64,
    record_history: bool,
}

impl TimelineRollback {
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        devices: Arc<dyn DeviceDirectory>,
        store: Arc<dyn SnapshotStore>,
        events: Arc<dyn EventSink>,
        config: &Config,
    ) -> Self {
        Self {
            remote,
            devices,
            store,
            events,
            executor: DeploymentExecutor::with_config(ExecutorConfig::from(&config.deployment)),
            max_age: Duration::try_hours(config.rollback.max_age_hours).unwrap_or(Duration::MAX),
            max_files: config.rollback.max_files,
            window: Duration::try_minutes(config.rollback.rollback_window_minutes)
                .unwrap_or(Duration::MAX),
            seconds_per_step: config.rollback.seconds_per_step_estimate,
            record_history: config.deployment.record_history,
        }
    }

    /// Build a plan restoring `device_id` to its state at `target_time`.
    pub async fn create_rollback_plan(
        &self,
        device_id: &str,
        target_time: DateTime<Utc>,
        file_paths: Option<&[String]>,
    ) -> Result<RollbackPlan> {
        let now = Utc::now();
        if target_time > now {
            return Err(crate::Error::Validation(
                "target time is in the future".to_string(),
            ));
        }
        // An out-of-range cutoff means there is no lower bound.
        if let Some(oldest) = now.checked_sub_signed(self.max_age) {
            if target_time < oldest {
                return Err(crate::Error::Validation(format!(
                    "target time is older than the maximum of {} hours",
                    self.max_age.num_hours()
                )));
            }
        }
        self.devices.get_device(device_id).await?;

        let filter = file_paths.unwrap_or(&[]);
        let after = self
            .store
            .query(
                &SnapshotQuery::device(device_id)
                    .files(filter)
                    .after(target_time),
            )
            .await?;

        // file -> records after the target, oldest first
        let mut per_file: BTreeMap<String, Vec<SnapshotRecord>> = BTreeMap::new();
        for record in after {
            per_file
                .entry(record.file_path.clone())
                .or_default()
                .push(record);
        }

        let mut steps = Vec::new();
        let mut warnings = Vec::new();
        for (file_path, records) in per_file {
            let changes: Vec<&SnapshotRecord> = records
                .iter()
                .filter(|r| r.source != SnapshotSource::Baseline)
                .collect();
            let latest = match changes.last() {
                Some(latest) => *latest,
                None => continue,
            };

            let before = self
                .store
                .query(
                    &SnapshotQuery::device(device_id)
                        .files(std::slice::from_ref(&file_path))
                        .before(target_time),
                )
                .await?;
            // Without older history, a baseline taken after the target is
            // still the content the first recorded change replaced.
            let restore_to = before.last().or_else(|| {
                records
                    .first()
                    .filter(|r| r.source == SnapshotSource::Baseline)
            });

            let step = match restore_to {
                Some(target) => RollbackStep {
                    file_path: file_path.clone(),
                    action: RollbackStepAction::Restore,
                    from_snapshot_id: latest.snapshot_id.clone(),
                    to_snapshot_id: Some(target.snapshot_id.clone()),
                    changes_undone: changes.len(),
                    description: format!(
                        "restore {} to version from {}",
                        file_path,
                        target.created_at.to_rfc3339()
                    ),
                },
                None => {
                    warnings.push(format!(
                        "{} has no version before the target time and will be deleted",
                        file_path
                    ));
                    RollbackStep {
                        file_path: file_path.clone(),
                        action: RollbackStepAction::Delete,
                        from_snapshot_id: latest.snapshot_id.clone(),
                        to_snapshot_id: None,
                        changes_undone: changes.len(),
                        description: format!("delete {}", file_path),
                    }
                }
            };
            steps.push(step);
        }

        if steps.len() > self.max_files {
            return Err(crate::Error::Validation(format!(
                "rollback touches {} files, more than the maximum of {}",
                steps.len(),
                self.max_files
            )));
        }
        if steps.is_empty() {
            warnings.push("no changes found after the target time".to_string());
        }

        let plan = RollbackPlan {
            plan_id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            target_time,
            created_at: now,
            can_execute: !steps.is_empty(),
            estimated_duration_secs: steps.len() as u64 * self.seconds_per_step,
            steps,
            warnings,
        };
        tracing::info!(
            plan_id = %plan.plan_id,
            device_id,
            steps = plan.steps.len(),
            warnings = plan.warnings.len(),
            "Rollback plan created"
        );
        Ok(plan)
    }

    /// Execute (or with `dry_run`, check) a rollback plan.
    pub async fn execute_rollback_plan(
        &self,
        plan: &RollbackPlan,
        dry_run: bool,
        continue_on_error: bool,
    ) -> Result<RollbackExecutionResult> {
        if !plan.can_execute {
            return Err(crate::Error::Validation(format!(
                "plan {} has nothing to execute",
                plan.plan_id
            )));
        }
        let started_at = Utc::now();
        let mut connections = Connections::new(Arc::clone(&self.remote), Arc::clone(&self.devices));
        let mut results = Vec::with_capacity(plan.steps.len());
        let mut halted = false;

        for step in &plan.steps {
            if halted {
                results.push(RollbackStepResult {
                    file_path: step.file_path.clone(),
                    action: step.action,
                    status: StepStatus::Skipped,
                    message: "skipped after an earlier failure".to_string(),
                    error: None,
                });
                continue;
            }

            let outcome = if dry_run {
                self.check_step(step).await
            } else {
                self.run_step(&plan.device_id, step, &mut connections).await
            };

            let result = match outcome {
                Ok(message) => RollbackStepResult {
                    file_path: step.file_path.clone(),
                    action: step.action,
                    status: StepStatus::Succeeded,
                    message,
                    error: None,
                },
                Err(e) => {
                    tracing::error!(plan_id = %plan.plan_id, file_path = %step.file_path, "Rollback step failed: {}", e);
                    halted = !continue_on_error;
                    RollbackStepResult {
                        file_path: step.file_path.clone(),
                        action: step.action,
                        status: StepStatus::Failed,
                        message: "step failed".to_string(),
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }
        connections.close_all().await;

        let result = RollbackExecutionResult::from_steps(plan, dry_run, results, started_at);
        let topic = if dry_run {
            events::ROLLBACK_VALIDATED
        } else {
            events::ROLLBACK_EXECUTED
        };
        self.events.publish(
            topic,
            json!({
                "plan_id": plan.plan_id,
                "device_id": plan.device_id,
                "target_time": plan.target_time,
                "successful_steps": result.successful_steps,
                "failed_steps": result.failed_steps,
                "skipped_steps": result.skipped_steps,
                "overall_success": result.overall_success,
            }),
        );
        tracing::info!(
            plan_id = %plan.plan_id,
            dry_run,
            succeeded = result.successful_steps,
            failed = result.failed_steps,
            skipped = result.skipped_steps,
            "Rollback plan finished"
        );
        Ok(result)
    }

    async fn target_snapshot(&self, step: &RollbackStep) -> Result<Option<SnapshotRecord>> {
        let id = match step.to_snapshot_id {
            Some(ref id) => id,
            None => return Ok(None),
        };
        match self.store.get(id).await? {
            Some(record) => Ok(Some(record)),
            None => Err(crate::Error::Configuration(format!(
                "target snapshot {} no longer exists",
                id
            ))),
        }
    }

    async fn check_step(&self, step: &RollbackStep) -> Result<String> {
        match self.target_snapshot(step).await? {
            Some(record) => Ok(format!(
                "would restore {} ({} bytes)",
                step.file_path, record.file_size
            )),
            None => Ok(format!("would delete {}", step.file_path)),
        }
    }

    async fn run_step(
        &self,
        device_id: &str,
        step: &RollbackStep,
        connections: &mut Connections,
    ) -> Result<String> {
        let target = self.target_snapshot(step).await?;
        let conn = connections
            .get(device_id)
            .await
            .map_err(|e| crate::Error::connection(device_id, e))?;

        match target {
            Some(record) => {
                self.executor
                    .write(conn, &step.file_path, &record.content)
                    .await
                    .map_err(|e| e.error)?;
                if self.record_history {
                    let history = SnapshotRecord::new(
                        device_id,
                        &step.file_path,
                        &record.content,
                        SnapshotSource::Rollback,
                    );
                    if let Err(e) = self.store.append(history).await {
                        tracing::warn!(device_id, file_path = %step.file_path, "Failed to record rollback history: {}", e);
                    }
                }
                Ok(format!("restored {}", step.file_path))
            }
            None => {
                self.executor.delete(conn, &step.file_path).await?;
                Ok(format!("deleted {}", step.file_path))
            }
        }
    }

    /// Cluster the device's changes of the last `hours_back` hours.
    pub async fn get_rollback_candidates(
        &self,
        device_id: &str,
        hours_back: i64,
    ) -> Result<Vec<RollbackCandidate>> {
        if hours_back <= 0 {
            return Err(crate::Error::Validation(
                "hours_back must be positive".to_string(),
            ));
        }
        let lookback =
            Duration::try_hours(hours_back).map_or(self.max_age, |d| d.min(self.max_age));
        let mut query = SnapshotQuery::device(device_id);
        if let Some(since) = Utc::now().checked_sub_signed(lookback) {
            query = query.after(since);
        }

        let events: Vec<ChangeEvent> = self
            .store
            .query(&query)
            .await?
            .into_iter()
            .filter(|r| r.source != SnapshotSource::Baseline)
            .map(|r| ChangeEvent {
                snapshot_id: r.snapshot_id,
                device_id: r.device_id,
                file_path: r.file_path,
                config_type: r.config_type,
                changed_at: r.created_at,
            })
            .collect();

        let candidates = cluster_change_events(&events, self.window);
        tracing::debug!(
            device_id,
            events = events.len(),
            candidates = candidates.len(),
            "Rollback candidates"
        );
        Ok(candidates)
    }
}

/// Group events whose gap to the previous event of the group is within
/// `window`. Returns the newest group first.
pub fn cluster_change_events(events: &[ChangeEvent], window: Duration) -> Vec<RollbackCandidate> {
    let mut sorted: Vec<&ChangeEvent> = events.iter().collect();
    sorted.sort_by_key(|e| e.changed_at);

    let mut groups: Vec<Vec<&ChangeEvent>> = Vec::new();
    for event in sorted {
        match groups.last_mut() {
            Some(group)
                if group
                    .last()
                    .map(|last| event.changed_at - last.changed_at <= window)
                    .unwrap_or(false) =>
            {
                group.push(event)
            }
            _ => groups.push(vec![event]),
        }
    }

    groups
        .iter()
        .rev()
        .filter_map(|group| summarize(group))
        .collect()
}

fn summarize(group: &[&ChangeEvent]) -> Option<RollbackCandidate> {
    let first = group.first()?;
    let last = group.last()?;
    let files: BTreeSet<&str> = group.iter().map(|e| e.file_path.as_str()).collect();
    let config_types: BTreeSet<&str> = group.iter().map(|e| e.config_type.as_str()).collect();
    let span_secs = (last.changed_at - first.changed_at).num_seconds();

    Some(RollbackCandidate {
        device_id: first.device_id.clone(),
        started_at: first.changed_at,
        ended_at: last.changed_at,
        span_secs,
        event_count: group.len(),
        file_count: files.len(),
        description: format!(
            "{} change(s) to {} file(s) over {}s starting {}",
            group.len(),
            files.len(),
            span_secs,
            first.changed_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        files: files.into_iter().map(str::to_string).collect(),
        config_types: config_types.into_iter().map(str::to_string).collect(),
        rollback_target: first.changed_at - Duration::seconds(1),
    })
}
