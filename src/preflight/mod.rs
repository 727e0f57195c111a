//! Pre-flight validation.
//!
//! Runs before any snapshot or write. Every device is probed for
//! connectivity, and every change is checked structurally on the devices
//! that answered. Nothing here modifies a remote file.

mod changes;
mod connectivity;

pub use changes::{check_change, check_changes};

use crate::models::request::ConfigurationFileChange;
use crate::services::devices::DeviceDirectory;
use crate::services::remote::RemoteClient;
use colored::Colorize;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Overall verdict for one device or one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Valid,
    Failed,
}

/// Structural check result for one change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileValidation {
    pub file_path: String,
    pub change_id: String,
    pub status: CheckStatus,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl FileValidation {
    pub fn is_valid(&self) -> bool {
        self.status == CheckStatus::Valid
    }
}

/// Validation result for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub device_id: String,
    pub device_name: String,
    pub overall_status: CheckStatus,
    pub validation_errors: Vec<String>,
    pub file_validations: Vec<FileValidation>,
}

impl ValidationResult {
    /// A device that could not be reached or resolved. File checks are not run.
    pub fn unreachable(device_id: &str, device_name: &str, error: String) -> Self {
        Self {
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            overall_status: CheckStatus::Failed,
            validation_errors: vec![error],
            file_validations: Vec::new(),
        }
    }

    /// A reachable device; fails when any file check fails.
    pub fn reachable(device_id: &str, device_name: &str, files: Vec<FileValidation>) -> Self {
        let validation_errors: Vec<String> = files
            .iter()
            .flat_map(|f| f.errors.iter().map(move |e| format!("{}: {}", f.file_path, e)))
            .collect();
        Self {
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            overall_status: if validation_errors.is_empty() {
                CheckStatus::Valid
            } else {
                CheckStatus::Failed
            },
            validation_errors,
            file_validations: files,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.overall_status == CheckStatus::Valid
    }
}

/// Pre-flight validator.
pub struct PreflightValidator {
    remote: Arc<dyn RemoteClient>,
    devices: Arc<dyn DeviceDirectory>,
    probe_timeout: Duration,
    concurrency: usize,
}

impl PreflightValidator {
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        devices: Arc<dyn DeviceDirectory>,
        probe_timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            remote,
            devices,
            probe_timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Validate every device against every change.
    ///
    /// Probes run concurrently; results are keyed by device id.
    pub async fn validate(
        &self,
        device_ids: &[String],
        changes: &[ConfigurationFileChange],
    ) -> BTreeMap<String, ValidationResult> {
        let file_checks = check_changes(changes);

        let probes: Vec<_> = device_ids
            .iter()
            .map(|device_id| self.validate_device(device_id, &file_checks))
            .collect();
        let results: Vec<ValidationResult> = stream::iter(probes)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        results
            .into_iter()
            .map(|r| (r.device_id.clone(), r))
            .collect()
    }

    async fn validate_device(&self, device_id: &str, file_checks: &[FileValidation]) -> ValidationResult {
        let device = match self.devices.get_device(device_id).await {
            Ok(device) => device,
            Err(e) => {
                tracing::warn!(device_id, "Device lookup failed: {}", e);
                return ValidationResult::unreachable(device_id, device_id, e.to_string());
            }
        };

        if let Err(reason) =
            connectivity::probe(self.remote.as_ref(), &device.hostname, self.probe_timeout).await
        {
            tracing::warn!(device_id, hostname = %device.hostname, "Device unreachable: {}", reason);
            return ValidationResult::unreachable(device_id, &device.name, reason);
        }

        let result = ValidationResult::reachable(device_id, &device.name, file_checks.to_vec());
        if result.is_valid() {
            tracing::debug!(device_id, "Device validated");
        } else {
            tracing::warn!(device_id, errors = result.validation_errors.len(), "Change checks failed");
        }
        result
    }
}

/// Whether every device passed.
pub fn all_passed(results: &BTreeMap<String, ValidationResult>) -> bool {
    results.values().all(ValidationResult::is_valid)
}

/// All errors across devices, prefixed with the device id.
pub fn collect_errors(results: &BTreeMap<String, ValidationResult>) -> Vec<String> {
    results
        .values()
        .flat_map(|r| {
            r.validation_errors
                .iter()
                .map(move |e| format!("{}: {}", r.device_id, e))
        })
        .collect()
}

/// Print validation results.
pub fn print_results(results: &BTreeMap<String, ValidationResult>) {
    for result in results.values() {
        if result.is_valid() {
            println!(
                "{} {} ({})",
                "[OK]".green(),
                result.device_id.bold(),
                result.device_name
            );
        } else {
            println!(
                "{} {} ({})",
                "[FAIL]".red(),
                result.device_id.bold(),
                result.device_name
            );
            for error in &result.validation_errors {
                println!("  {} {}", "->".yellow(), error);
            }
        }
        for file in &result.file_validations {
            for warning in &file.warnings {
                println!("  {} {}: {}", "!".yellow(), file.file_path, warning);
            }
        }
    }
}
