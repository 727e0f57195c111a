//! Config Deploy CLI
//!
//! Pushes configuration files to device fleets atomically and rolls them back.

use clap::Parser;
use config_deploy::cli::{
    args::{Cli, Commands, RollbackAction, SessionsAction},
    commands::{deploy, rollback, sessions},
};
use config_deploy::models::config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    let config = config::load_config(cli.config.as_deref())?;

    // Run the appropriate command
    match cli.command {
        Commands::Deploy {
            request,
            dry_run,
            no_auto_rollback,
            actor,
        } => {
            let actor = actor.unwrap_or_else(default_actor);
            let response =
                deploy::deploy(&config, &request, dry_run, no_auto_rollback, &actor).await?;
            if !response.is_success() {
                anyhow::bail!(
                    "Batch {} ended in status {}",
                    response.batch_id,
                    response.status
                );
            }
        }

        Commands::Validate { request, actor } => {
            let actor = actor.unwrap_or_else(default_actor);
            let response = deploy::validate(&config, &request, &actor).await?;
            if !response.is_success() {
                anyhow::bail!("Validation failed. Fix the issues above and try again.");
            }
        }

        Commands::Sessions { action } => match action {
            SessionsAction::List => {
                sessions::list_sessions(&config).await?;
            }
            SessionsAction::Show { batch_id } => {
                sessions::show_session(&config, &batch_id).await?;
            }
        },

        Commands::Rollback { action } => match action {
            RollbackAction::Plan {
                device,
                to,
                files,
                output,
            } => {
                rollback::plan(&config, &device, &to, &files, output.as_deref()).await?;
            }
            RollbackAction::Execute {
                plan,
                dry_run,
                stop_on_error,
            } => {
                let result = rollback::execute(&config, &plan, dry_run, stop_on_error).await?;
                if !result.overall_success {
                    anyhow::bail!("{} rollback step(s) failed", result.failed_steps);
                }
            }
            RollbackAction::Candidates { device, hours } => {
                rollback::candidates(&config, &device, hours).await?;
            }
        },
    }

    Ok(())
}

/// Initialize the logging system.
fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("config_deploy=debug")
        } else {
            EnvFilter::new("config_deploy=info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}

/// Local user name, recorded as the actor by default.
fn default_actor() -> String {
    whoami::username()
}
