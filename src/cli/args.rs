//! Command line argument definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Config Deploy - Atomic configuration deployment to device fleets
#[derive(Parser, Debug)]
#[command(name = "config-deploy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config.toml (default: ~/.config/config_deploy/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy a batch of configuration changes
    Deploy {
        /// Path to the request JSON file
        #[arg(value_name = "REQUEST_JSON")]
        request: PathBuf,

        /// Validate and preview without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Keep applied changes when the batch fails
        #[arg(long)]
        no_auto_rollback: bool,

        /// Actor recorded on the transaction (default: current user)
        #[arg(long)]
        actor: Option<String>,
    },

    /// Validate a request without deploying it
    Validate {
        /// Path to the request JSON file
        #[arg(value_name = "REQUEST_JSON")]
        request: PathBuf,

        /// Actor recorded on the transaction (default: current user)
        #[arg(long)]
        actor: Option<String>,
    },

    /// Manage saved batch reports
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Roll a device back to a point in time
    Rollback {
        #[command(subcommand)]
        action: RollbackAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionsAction {
    /// List all saved batch reports
    List,

    /// Show details of a batch report
    Show {
        /// Batch ID
        #[arg(value_name = "BATCH_ID")]
        batch_id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum RollbackAction {
    /// Build a rollback plan
    Plan {
        /// Device ID
        #[arg(long)]
        device: String,

        /// Target time (RFC 3339, e.g. 2024-05-01T12:00:00Z)
        #[arg(long, value_name = "TIME")]
        to: String,

        /// Only roll back these files (repeatable)
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<String>,

        /// Output path for the plan JSON
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Execute a rollback plan
    Execute {
        /// Path to the plan JSON file
        #[arg(value_name = "PLAN_JSON")]
        plan: PathBuf,

        /// Check the plan without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Stop at the first failed step
        #[arg(long)]
        stop_on_error: bool,
    },

    /// Suggest rollback points from recent changes
    Candidates {
        /// Device ID
        #[arg(long)]
        device: String,

        /// Lookback window in hours
        #[arg(long, default_value = "24")]
        hours: i64,
    },
}
