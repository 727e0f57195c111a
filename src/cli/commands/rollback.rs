//! Rollback command implementation.
//!
//! Plans and executes time-window rollbacks from the snapshot history.

use crate::models::config::Config;
use crate::models::rollback::{RollbackExecutionResult, RollbackPlan, StepStatus};
use crate::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use std::path::{Path, PathBuf};

pub fn save_plan(plan: &RollbackPlan, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(plan)?)?;
    Ok(())
}

pub fn load_plan(path: &Path) -> Result<RollbackPlan> {
    if !path.exists() {
        return Err(crate::Error::ResourceNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| crate::Error::Validation(format!("invalid time '{}': {}", value, e)))
}

/// Build and save a rollback plan.
pub async fn plan(
    config: &Config,
    device: &str,
    to: &str,
    files: &[String],
    output: Option<&Path>,
) -> Result<RollbackPlan> {
    println!("{}", "[ROLLBACK] Planning rollback".bold().cyan());
    println!();

    let target_time = parse_time(to)?;
    let timeline = super::timeline(config)?;
    let filter = (!files.is_empty()).then_some(files);
    let plan = timeline
        .create_rollback_plan(device, target_time, filter)
        .await?;

    println!("  {} {}", "Device:".bold(), plan.device_id);
    println!("  {} {}", "Target:".bold(), plan.target_time);
    println!("  {} {}", "Steps:".bold(), plan.steps.len());
    println!(
        "  {} ~{}s",
        "Estimated:".bold(),
        plan.estimated_duration_secs
    );
    println!();

    for step in &plan.steps {
        println!(
            "  - {} ({} change(s) undone)",
            step.description, step.changes_undone
        );
    }
    for warning in &plan.warnings {
        println!("  {} {}", "!".yellow(), warning);
    }

    if !plan.can_execute {
        println!();
        println!("{}", "Nothing to roll back.".yellow());
        return Ok(plan);
    }

    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_plan_path(config, &plan));
    save_plan(&plan, &path)?;
    println!();
    println!(
        "{} {}",
        "[OK] Plan saved to:".bold().green(),
        path.display()
    );
    println!();
    println!("{}", "[Next Steps]".bold().yellow());
    println!(
        "  To check it: {}",
        format!(
            "config-deploy rollback execute {} --dry-run",
            path.display()
        )
        .cyan()
    );
    Ok(plan)
}

/// Execute a saved rollback plan.
pub async fn execute(
    config: &Config,
    plan_file: &Path,
    dry_run: bool,
    stop_on_error: bool,
) -> Result<RollbackExecutionResult> {
    println!("{}", "[ROLLBACK] Executing rollback plan".bold().cyan());
    println!();

    println!("[INFO] Loading plan: {}", plan_file.display());
    let plan = load_plan(plan_file)?;
    println!("  {} {}", "Device:".bold(), plan.device_id);
    println!("  {} {}", "Target:".bold(), plan.target_time);
    println!("  {} {}", "Steps:".bold(), plan.steps.len());
    println!();

    if dry_run {
        println!(
            "{}",
            "[DRY-RUN] Checking plan, nothing will be written"
                .bold()
                .yellow()
        );
    } else {
        println!(
            "{}",
            "[WARNING] This will overwrite files on the device!"
                .bold()
                .yellow()
        );
    }
    println!();

    let timeline = super::timeline(config)?;
    let result = timeline
        .execute_rollback_plan(&plan, dry_run, !stop_on_error)
        .await?;

    for step in &result.step_results {
        let marker = match step.status {
            StepStatus::Succeeded => "[OK]".green(),
            StepStatus::Failed => "[FAIL]".red(),
            StepStatus::Skipped => "[SKIP]".yellow(),
        };
        match step.error {
            Some(ref error) => println!("  {} {} {}", marker, step.file_path, error),
            None => println!("  {} {}", marker, step.message),
        }
    }
    println!();
    println!(
        "  {} {} succeeded, {} failed, {} skipped",
        "Summary:".bold(),
        result.successful_steps,
        result.failed_steps,
        result.skipped_steps
    );

    if result.overall_success {
        println!("{}", "[OK] Rollback completed successfully!".green());
    } else {
        println!("{}", "[WARNING] Rollback completed with errors".yellow());
    }
    Ok(result)
}

/// Show rollback suggestions for a device.
pub async fn candidates(config: &Config, device: &str, hours: i64) -> Result<()> {
    println!("{} {}", "[ROLLBACK] Candidates for".bold().cyan(), device);
    println!();

    let timeline = super::timeline(config)?;
    let candidates = timeline.get_rollback_candidates(device, hours).await?;
    if candidates.is_empty() {
        println!("No changes in the last {} hour(s).", hours);
        return Ok(());
    }

    for (i, candidate) in candidates.iter().enumerate() {
        println!("  {}. {}", i + 1, candidate.description);
        println!("     {} {}", "Files:".bold(), candidate.files.join(", "));
        println!(
            "     {} {}",
            "Types:".bold(),
            candidate.config_types.join(", ")
        );
        println!(
            "     {} {}",
            "Undo:".bold(),
            format!(
                "config-deploy rollback plan --device {} --to {}",
                device,
                candidate.rollback_target.to_rfc3339()
            )
            .cyan()
        );
    }
    Ok(())
}

/// Default output path for a plan.
pub fn default_plan_path(config: &Config, plan: &RollbackPlan) -> PathBuf {
    config
        .storage
        .data_dir
        .join("plans")
        .join(format!("rollback_{}.json", plan.plan_id))
}
