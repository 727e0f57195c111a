//! Sessions command implementation.
//!
//! Batch reports are stored as `<data_dir>/sessions/<batch_id>.json`.

use crate::models::config::Config;
use crate::models::transaction::BatchDeploymentResponse;
use crate::Result;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

/// Save a response as a session report.
pub fn save_report(config: &Config, response: &BatchDeploymentResponse) -> Result<PathBuf> {
    save_report_to(&config.sessions_dir(), response)
}

pub fn save_report_to(dir: &Path, response: &BatchDeploymentResponse) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", response.batch_id));
    let json = serde_json::to_string_pretty(response)?;
    fs::write(&path, json)?;
    tracing::debug!("Saved report to {:?}", path);
    Ok(path)
}

pub fn load_report(path: &Path) -> Result<BatchDeploymentResponse> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// All readable reports in `dir`, newest first.
pub fn list_reports(dir: &Path) -> Result<Vec<BatchDeploymentResponse>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut reports = Vec::new();
    for entry in fs::read_dir(dir)?.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match load_report(&path) {
            Ok(report) => reports.push(report),
            Err(e) => tracing::warn!("Skipping unreadable report {:?}: {}", path, e),
        }
    }
    reports.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Ok(reports)
}

/// List all sessions.
pub async fn list_sessions(config: &Config) -> Result<()> {
    println!("{}", "Sessions".bold().cyan());
    println!();

    let sessions_dir = config.sessions_dir();
    let reports = list_reports(&sessions_dir)?;
    if reports.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!(
        "{:<44} {:<20} {:<8} {:<8} {}",
        "Batch ID".bold(),
        "Status".bold(),
        "Applied".bold(),
        "Failed".bold(),
        "Started".bold()
    );
    println!("{}", "-".repeat(100));

    for report in reports {
        println!(
            "{:<44} {:<20} {:<8} {:<8} {}",
            report.batch_id,
            report.status.to_string(),
            report.applied_changes.len(),
            report.failed_changes.len(),
            report.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!();
    println!("Sessions directory: {}", sessions_dir.display());
    Ok(())
}

/// Show details of a specific session.
pub async fn show_session(config: &Config, batch_id: &str) -> Result<()> {
    println!("{} {}", "Session:".bold().cyan(), batch_id);
    println!();

    let path = config.sessions_dir().join(format!("{}.json", batch_id));
    if !path.exists() {
        return Err(crate::Error::ResourceNotFound(format!(
            "session {}",
            batch_id
        )));
    }

    let report = load_report(&path)?;
    println!("  {} {}", "Created by:".bold(), report.created_by);
    println!("  {} {}", "Started:".bold(), report.started_at);
    if let Some(completed) = report.completed_at {
        println!("  {} {}", "Completed:".bold(), completed);
    }
    println!(
        "  {} {} device(s), {} change(s)",
        "Scope:".bold(),
        report.device_count,
        report.change_count
    );
    println!();

    super::deploy::print_response(&report);

    if !report.history.is_empty() {
        println!();
        println!("{}", "History:".bold());
        for step in &report.history {
            println!(
                "  {} {} -> {}{}",
                step.at.format("%H:%M:%S%.3f"),
                step.from,
                step.to,
                step.reason
                    .as_deref()
                    .map(|r| format!(" ({})", r))
                    .unwrap_or_default()
            );
        }
    }

    println!();
    println!("Report: {}", path.display());
    Ok(())
}
