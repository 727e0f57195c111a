//! Batch transaction manager.
//!
//! Owns the state machine of every deployment attempt and sequences the
//! phases: validate, capture snapshots, execute, roll back. Failures after
//! the transaction exists never escape; callers always get a response.

use super::diff;
use super::executor::{DeploymentExecutor, ExecutorConfig, WriteError};
use super::files::Connections;
use super::registry::{TransactionFilter, TransactionHandle, TransactionRegistry};
use super::rollback::RollbackExecutor;
use super::snapshot;
use crate::models::config::Config;
use crate::models::request::BatchDeploymentRequest;
use crate::models::snapshot::{
    SkippedSnapshot, SnapshotCaptureResult, SnapshotRecord, SnapshotSource,
};
use crate::models::transaction::{
    BatchDeploymentResponse, BatchTransaction, ChangePreview, TransactionStatus, TransactionSummary,
};
use crate::preflight::{self, PreflightValidator};
use crate::services::devices::DeviceDirectory;
use crate::services::events::{self, EventSink};
use crate::services::remote::RemoteClient;
use crate::services::store::SnapshotStore;
use crate::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Collaborators the engine runs against.
#[derive(Clone)]
pub struct DeploymentServices {
    pub remote: Arc<dyn RemoteClient>,
    pub devices: Arc<dyn DeviceDirectory>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub events: Arc<dyn EventSink>,
}

/// Batch deployment manager.
pub struct BatchDeploymentManager {
    services: DeploymentServices,
    config: Config,
    registry: TransactionRegistry,
    validator: PreflightValidator,
    executor: DeploymentExecutor,
    rollback: RollbackExecutor,
}

impl BatchDeploymentManager {
    pub fn new(services: DeploymentServices, config: Config) -> Self {
        let registry = TransactionRegistry::new(&config.registry);
        let validator = PreflightValidator::new(
            Arc::clone(&services.remote),
            Arc::clone(&services.devices),
            Duration::from_secs(config.deployment.probe_timeout_secs),
            config.deployment.validation_concurrency,
        );
        let executor = DeploymentExecutor::with_config(ExecutorConfig::from(&config.deployment));
        let history = config
            .deployment
            .record_history
            .then(|| Arc::clone(&services.snapshots));
        let rollback = RollbackExecutor::new(executor.clone(), history);

        Self {
            services,
            config,
            registry,
            validator,
            executor,
            rollback,
        }
    }

    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    /// Start background eviction of finished transactions.
    pub fn start(&self) {
        self.registry.start();
    }

    pub fn stop(&self) {
        self.registry.stop();
    }

    /// Run a batch deployment to its final state.
    ///
    /// Returns `Err(Validation)` only when the request is malformed; every
    /// later failure is reported through the response.
    pub async fn create_batch_deployment(
        &self,
        request: BatchDeploymentRequest,
        actor: &str,
    ) -> Result<BatchDeploymentResponse> {
        request.check()?;

        let txn = BatchTransaction::new(&request, actor);
        tracing::info!(
            batch_id = %txn.batch_id,
            devices = txn.device_ids.len(),
            changes = txn.changes.len(),
            dry_run = txn.dry_run,
            actor,
            "Batch deployment created"
        );
        self.services.events.publish(
            events::DEPLOYMENT_STARTED,
            json!({
                "batch_id": txn.batch_id,
                "device_ids": txn.device_ids,
                "change_count": txn.changes.len(),
                "dry_run": txn.dry_run,
                "created_by": actor,
            }),
        );

        let handle = self.registry.register(txn);
        handle.set_running(true);

        if let Err(e) = self.run(&handle).await {
            self.fail(&handle, e).await;
        }

        // A cancel that arrived after the last checkpoint saw the run as live;
        // settle it under the same lock that clears the running flag.
        let mut txn = handle.txn.write().await;
        if handle.is_cancel_requested() && !txn.status.is_terminal() {
            let reason = format!(
                "cancelled by {}",
                txn.cancelled_by.as_deref().unwrap_or("unknown")
            );
            if let Err(e) = txn.transition(TransactionStatus::Cancelled, Some(&reason)) {
                tracing::error!(batch_id = %txn.batch_id, "Cancel failed: {}", e);
            }
        }
        handle.set_running(false);
        self.publish_outcome(&txn);
        tracing::info!(batch_id = %txn.batch_id, status = %txn.status, "Batch deployment finished");
        Ok(BatchDeploymentResponse::from(&*txn))
    }

    /// Validate a request without executing it.
    pub async fn validate_batch_deployment(
        &self,
        mut request: BatchDeploymentRequest,
        actor: &str,
    ) -> Result<BatchDeploymentResponse> {
        request.dry_run = true;
        self.create_batch_deployment(request, actor).await
    }

    pub async fn get_batch_status(&self, batch_id: &str) -> Result<BatchDeploymentResponse> {
        let handle = self
            .registry
            .get(batch_id)
            .ok_or_else(|| crate::Error::ResourceNotFound(format!("batch {}", batch_id)))?;
        let txn = handle.txn.read().await;
        Ok(BatchDeploymentResponse::from(&*txn))
    }

    /// Cancel a transaction.
    ///
    /// A running deployment stops at its next step and reverts what it has
    /// applied. An idle transaction (a finished dry run) is cancelled at once.
    /// Returns false for unknown or already finished transactions.
    pub async fn cancel_batch_deployment(&self, batch_id: &str, actor: &str) -> bool {
        let handle = match self.registry.get(batch_id) {
            Some(handle) => handle,
            None => return false,
        };

        let mut txn = handle.txn.write().await;
        if txn.status.is_terminal() {
            return false;
        }
        txn.cancelled_by = Some(actor.to_string());
        handle.request_cancel();
        tracing::info!(batch_id, actor, status = %txn.status, "Cancellation requested");

        if !handle.is_running() {
            let reason = format!("cancelled by {}", actor);
            if let Err(e) = txn.transition(TransactionStatus::Cancelled, Some(&reason)) {
                tracing::error!(batch_id, "Cancel failed: {}", e);
                return false;
            }
            self.publish_outcome(&txn);
        }
        true
    }

    pub async fn list_transactions(&self, filter: &TransactionFilter) -> Vec<TransactionSummary> {
        self.registry.list(filter).await
    }

    async fn run(&self, handle: &TransactionHandle) -> Result<()> {
        let (batch_id, device_ids, changes, dry_run) = {
            let txn = handle.txn.read().await;
            (
                txn.batch_id.clone(),
                txn.device_ids.clone(),
                txn.changes.clone(),
                txn.dry_run,
            )
        };

        // Validation
        let results = self.validator.validate(&device_ids, &changes).await;
        let passed = preflight::all_passed(&results);
        let errors = preflight::collect_errors(&results);
        {
            let mut txn = handle.txn.write().await;
            txn.validation_results = results;
            if !passed {
                tracing::warn!(batch_id = %batch_id, errors = errors.len(), "Validation failed");
                txn.error_message = Some(errors.join("; "));
                return txn.transition(
                    TransactionStatus::ValidationFailed,
                    Some("pre-flight validation failed"),
                );
            }
        }
        if self.cancel_if_requested(handle).await? {
            return Ok(());
        }
        handle
            .txn
            .write()
            .await
            .transition(TransactionStatus::Validated, None)?;
        tracing::info!(batch_id = %batch_id, "Validation passed");

        let mut connections = Connections::new(
            Arc::clone(&self.services.remote),
            Arc::clone(&self.services.devices),
        );
        let outcome = self
            .deploy(handle, &mut connections, &batch_id, &device_ids, dry_run)
            .await;
        connections.close_all().await;
        outcome
    }

    async fn deploy(
        &self,
        handle: &TransactionHandle,
        connections: &mut Connections,
        batch_id: &str,
        device_ids: &[String],
        dry_run: bool,
    ) -> Result<()> {
        self.capture_snapshots(handle, connections, batch_id, device_ids, dry_run)
            .await;

        if dry_run {
            self.build_previews(handle).await;
            tracing::info!(batch_id, "Dry run complete");
            self.cancel_if_requested(handle).await?;
            return Ok(());
        }
        if self.cancel_if_requested(handle).await? {
            return Ok(());
        }

        handle
            .txn
            .write()
            .await
            .transition(TransactionStatus::Executing, None)?;

        let cancelled = self
            .execute(handle, connections, batch_id, device_ids)
            .await;
        if cancelled {
            let txn = handle.txn.read().await.clone();
            if !txn.written_changes.is_empty() {
                tracing::info!(
                    batch_id,
                    written = txn.written_changes.len(),
                    "Reverting cancelled batch"
                );
                let entries = self.rollback.revert(&txn, connections).await;
                handle.txn.write().await.rollback_plan.extend(entries);
            }
            let mut txn = handle.txn.write().await;
            let reason = format!(
                "cancelled by {}",
                txn.cancelled_by.as_deref().unwrap_or("unknown")
            );
            return txn.transition(TransactionStatus::Cancelled, Some(&reason));
        }

        let outcome = {
            let mut txn = handle.txn.write().await;
            let outcome = txn.execution_outcome();
            if outcome != TransactionStatus::Completed {
                txn.error_message = Some(format!(
                    "{} of {} changes failed",
                    txn.failed_changes.len(),
                    txn.failed_changes.len() + txn.applied_changes.len()
                ));
            }
            txn.transition(outcome, None)?;
            outcome
        };
        tracing::info!(batch_id, status = %outcome, "Execution finished");

        if outcome != TransactionStatus::Completed {
            self.auto_rollback(handle, connections).await?;
        }
        Ok(())
    }

    async fn capture_snapshots(
        &self,
        handle: &TransactionHandle,
        connections: &mut Connections,
        batch_id: &str,
        device_ids: &[String],
        dry_run: bool,
    ) {
        let paths: Vec<String> = {
            let txn = handle.txn.read().await;
            let mut paths: Vec<String> = Vec::new();
            for change in &txn.changes {
                if !paths.contains(&change.file_path) {
                    paths.push(change.file_path.clone());
                }
            }
            paths
        };

        for device_id in device_ids {
            for path in &paths {
                let captured = match connections.get(device_id).await {
                    Ok(conn) => snapshot::capture(&self.executor.files(conn), path).await,
                    Err(e) => SnapshotCaptureResult::Skipped { reason: e },
                };

                match captured {
                    SnapshotCaptureResult::Captured(snap) => {
                        tracing::debug!(batch_id, device_id = %device_id, file_path = %path, existed = snap.existed, "Snapshot captured");
                        if !dry_run && snap.existed {
                            self.record_baseline(batch_id, device_id, path, &snap.content)
                                .await;
                        }
                        handle
                            .txn
                            .write()
                            .await
                            .store_snapshot(device_id, path, snap);
                    }
                    SnapshotCaptureResult::Skipped { reason } => {
                        tracing::warn!(batch_id, device_id = %device_id, file_path = %path, "Snapshot skipped: {}", reason);
                        handle
                            .txn
                            .write()
                            .await
                            .skipped_snapshots
                            .push(SkippedSnapshot {
                                device_id: device_id.clone(),
                                file_path: path.clone(),
                                reason,
                            });
                    }
                }
            }
        }
    }

    async fn build_previews(&self, handle: &TransactionHandle) {
        let mut txn = handle.txn.write().await;
        let mut previews = Vec::new();
        for device_id in &txn.device_ids {
            for change in &txn.changes {
                let (existed, old) = match txn.snapshot(device_id, &change.file_path) {
                    Some(snap) => (snap.existed, snap.content.as_str()),
                    None => (false, ""),
                };
                let diff = diff::unified_diff(&change.file_path, old, &change.content);
                previews.push(ChangePreview {
                    device_id: device_id.clone(),
                    file_path: change.file_path.clone(),
                    change_id: change.change_id.clone(),
                    existed,
                    changed: !diff.is_empty(),
                    diff,
                });
            }
        }
        txn.previews = previews;
    }

    /// Apply every change to every device, in request order per device.
    ///
    /// Returns true when a cancellation interrupted the loop.
    async fn execute(
        &self,
        handle: &TransactionHandle,
        connections: &mut Connections,
        batch_id: &str,
        device_ids: &[String],
    ) -> bool {
        let changes = handle.txn.read().await.changes.clone();
        let limit = Duration::from_secs(self.config.deployment.deployment_timeout_secs);
        let deadline = Instant::now() + limit;

        for device_id in device_ids {
            for change in &changes {
                if handle.is_cancel_requested() {
                    return true;
                }

                let result = if Instant::now() >= deadline {
                    Err(WriteError::from(crate::Error::Timeout {
                        operation: "deployment".to_string(),
                        seconds: limit.as_secs(),
                    }))
                } else {
                    match connections.get(device_id).await {
                        Ok(conn) => self.executor.apply(conn, change).await,
                        Err(e) => Err(WriteError::from(crate::Error::connection(
                            device_id.as_str(),
                            e,
                        ))),
                    }
                };

                match result {
                    Ok(()) => {
                        tracing::info!(batch_id, device_id = %device_id, file_path = %change.file_path, "Change applied");
                        handle.txn.write().await.record_applied(device_id, change);
                        self.record_history(
                            batch_id,
                            device_id,
                            &change.file_path,
                            &change.content,
                            SnapshotSource::Deployment,
                        )
                        .await;
                    }
                    Err(e) => {
                        tracing::error!(
                            batch_id,
                            device_id = %device_id,
                            file_path = %change.file_path,
                            committed = e.committed,
                            "Change failed: {}",
                            e
                        );
                        handle.txn.write().await.record_failed(
                            device_id,
                            change,
                            &e.to_string(),
                            e.committed,
                        );
                    }
                }
            }
        }
        false
    }

    /// Revert applied changes after a failed outcome, when enabled.
    async fn auto_rollback(
        &self,
        handle: &TransactionHandle,
        connections: &mut Connections,
    ) -> Result<()> {
        let txn = handle.txn.read().await.clone();
        if !txn.auto_rollback {
            return Ok(());
        }

        tracing::info!(batch_id = %txn.batch_id, written = txn.written_changes.len(), "Rolling back batch");
        let entries = self.rollback.revert(&txn, connections).await;
        let mut txn = handle.txn.write().await;
        txn.rollback_plan.extend(entries);
        txn.transition(TransactionStatus::RolledBack, Some("automatic rollback"))
    }

    /// Catch-all for errors escaping the phases.
    async fn fail(&self, handle: &TransactionHandle, error: crate::Error) {
        let batch_id = handle.batch_id.clone();
        tracing::error!(batch_id = %batch_id, "Batch deployment failed: {}", error);

        let needs_rollback = {
            let mut txn = handle.txn.write().await;
            txn.error_message = Some(error.to_string());
            if !txn.status.is_terminal() {
                if let Err(e) = txn.transition(TransactionStatus::Failed, Some("unhandled error")) {
                    tracing::error!(batch_id = %batch_id, "{}", e);
                }
            }
            txn.auto_rollback
                && txn.rollback_plan.is_empty()
                && matches!(
                    txn.status,
                    TransactionStatus::Failed | TransactionStatus::PartiallyCompleted
                )
        };

        if needs_rollback {
            let mut connections = Connections::new(
                Arc::clone(&self.services.remote),
                Arc::clone(&self.services.devices),
            );
            if let Err(e) = self.auto_rollback(handle, &mut connections).await {
                tracing::error!(batch_id = %batch_id, "Rollback after failure did not finish: {}", e);
            }
            connections.close_all().await;
        }
    }

    async fn cancel_if_requested(&self, handle: &TransactionHandle) -> Result<bool> {
        if !handle.is_cancel_requested() {
            return Ok(false);
        }
        let mut txn = handle.txn.write().await;
        let reason = format!(
            "cancelled by {}",
            txn.cancelled_by.as_deref().unwrap_or("unknown")
        );
        txn.transition(TransactionStatus::Cancelled, Some(&reason))?;
        Ok(true)
    }

    async fn record_baseline(&self, batch_id: &str, device_id: &str, path: &str, content: &str) {
        if !self.config.deployment.record_history {
            return;
        }
        match self.services.snapshots.has_history(device_id, path).await {
            Ok(false) => {
                self.record_history(batch_id, device_id, path, content, SnapshotSource::Baseline)
                    .await
            }
            Ok(true) => {}
            Err(e) => tracing::warn!(batch_id, device_id, "History lookup failed: {}", e),
        }
    }

    async fn record_history(
        &self,
        batch_id: &str,
        device_id: &str,
        path: &str,
        content: &str,
        source: SnapshotSource,
    ) {
        if !self.config.deployment.record_history {
            return;
        }
        let record = SnapshotRecord::new(device_id, path, content, source).with_batch(batch_id);
        if let Err(e) = self.services.snapshots.append(record).await {
            tracing::warn!(
                batch_id,
                device_id,
                file_path = path,
                "Failed to record history: {}",
                e
            );
        }
    }

    fn publish_outcome(&self, txn: &BatchTransaction) {
        let topic = match txn.status {
            TransactionStatus::RolledBack => events::DEPLOYMENT_ROLLED_BACK,
            TransactionStatus::Cancelled => events::DEPLOYMENT_CANCELLED,
            _ => events::DEPLOYMENT_FINISHED,
        };
        self.services.events.publish(
            topic,
            json!({
                "batch_id": txn.batch_id,
                "status": txn.status,
                "applied": txn.applied_changes.len(),
                "failed": txn.failed_changes.len(),
                "rolled_back": txn.rollback_plan.len(),
                "error_message": txn.error_message,
            }),
        );
    }
}
