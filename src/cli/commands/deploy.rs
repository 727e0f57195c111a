//! Deploy and validate command implementations.
//!
//! Reads a request JSON file, runs the batch and saves the response as a
//! session report.

use super::sessions;
use crate::models::config::Config;
use crate::models::request::BatchDeploymentRequest;
use crate::models::transaction::{BatchDeploymentResponse, RollbackStepStatus, TransactionStatus};
use crate::preflight;
use crate::Result;
use colored::Colorize;
use std::path::Path;

/// Load a request file.
pub fn load_request(path: &Path) -> Result<BatchDeploymentRequest> {
    if !path.exists() {
        return Err(crate::Error::ResourceNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Deploy a request file.
pub async fn deploy(
    config: &Config,
    request_file: &Path,
    dry_run: bool,
    no_auto_rollback: bool,
    actor: &str,
) -> Result<BatchDeploymentResponse> {
    println!("{}", "[DEPLOY] Batch deployment".bold().cyan());
    println!();

    println!("[INFO] Loading request: {}", request_file.display());
    let mut request = load_request(request_file)?;
    request.dry_run |= dry_run;
    if no_auto_rollback {
        request.auto_rollback = false;
    }

    println!(
        "  {} {}",
        "Devices:".bold(),
        request.unique_device_ids().join(", ")
    );
    println!("  {} {}", "Changes:".bold(), request.changes.len());
    println!("  {} {}", "Auto rollback:".bold(), request.auto_rollback);
    println!();

    if request.dry_run {
        println!("{}", "[DRY-RUN] Nothing will be written".bold().yellow());
    } else {
        println!(
            "{}",
            "[WARNING] This will modify files on remote devices!"
                .bold()
                .yellow()
        );
    }
    println!();

    let manager = super::manager(config)?;
    let response = manager.create_batch_deployment(request, actor).await?;

    print_response(&response);
    save(config, &response)?;
    Ok(response)
}

/// Validate a request file without executing it.
pub async fn validate(
    config: &Config,
    request_file: &Path,
    actor: &str,
) -> Result<BatchDeploymentResponse> {
    println!("{}", "[VALIDATE] Pre-flight validation".bold().cyan());
    println!();

    let request = load_request(request_file)?;
    let manager = super::manager(config)?;
    let response = manager.validate_batch_deployment(request, actor).await?;

    preflight::print_results(&response.validation_results);
    println!();
    print_response(&response);
    save(config, &response)?;
    Ok(response)
}

fn save(config: &Config, response: &BatchDeploymentResponse) -> Result<()> {
    let path = sessions::save_report(config, response)?;
    println!();
    println!(
        "{} {}",
        "[OK] Report saved to:".bold().green(),
        path.display()
    );
    Ok(())
}

/// Print a human summary of a response.
pub fn print_response(response: &BatchDeploymentResponse) {
    let status = response.status.to_string();
    let status = match response.status {
        TransactionStatus::Completed => status.green(),
        TransactionStatus::Validated if response.dry_run => status.green(),
        TransactionStatus::RolledBack | TransactionStatus::Cancelled => status.yellow(),
        _ => status.red(),
    };

    println!("  {} {}", "Batch:".bold(), response.batch_id);
    println!("  {} {}", "Status:".bold(), status);
    println!("  {} {}", "Applied:".bold(), response.applied_changes.len());
    println!("  {} {}", "Failed:".bold(), response.failed_changes.len());
    if let Some(ref error) = response.error_message {
        println!("  {} {}", "Error:".bold(), error.red());
    }

    for failed in &response.failed_changes {
        println!(
            "  {} {}:{} {}",
            "[FAIL]".red(),
            failed.device_id,
            failed.file_path,
            failed.error
        );
    }
    for skipped in &response.skipped_snapshots {
        println!(
            "  {} {}:{} snapshot skipped ({})",
            "!".yellow(),
            skipped.device_id,
            skipped.file_path,
            skipped.reason
        );
    }

    if !response.rollback_plan.is_empty() {
        println!();
        println!("{}", "Rollback:".bold());
        for entry in &response.rollback_plan {
            let marker = match entry.status {
                RollbackStepStatus::RolledBack => "[OK]".green(),
                RollbackStepStatus::RollbackFailed => "[FAIL]".red(),
            };
            match entry.error {
                Some(ref error) => println!(
                    "  {} {}:{} {}",
                    marker, entry.device_id, entry.file_path, error
                ),
                None => println!("  {} {}:{}", marker, entry.device_id, entry.file_path),
            }
        }
    }

    for preview in response.previews.iter().filter(|p| p.changed) {
        println!();
        println!("{} {}", preview.device_id.bold(), preview.file_path);
        for line in preview.diff.lines() {
            if line.starts_with('+') && !line.starts_with("+++") {
                println!("  {}", line.green());
            } else if line.starts_with('-') && !line.starts_with("---") {
                println!("  {}", line.red());
            } else {
                println!("  {}", line);
            }
        }
    }
}
