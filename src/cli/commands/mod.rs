//! CLI command implementations.

pub mod deploy;
pub mod rollback;
pub mod sessions;

use crate::core::{BatchDeploymentManager, DeploymentServices, TimelineRollback};
use crate::models::config::Config;
use crate::services::devices::StaticDirectory;
use crate::services::events::LogEventSink;
use crate::services::ssh::ShellClient;
use crate::services::store::JsonLinesSnapshotStore;
use crate::Result;
use std::sync::Arc;

/// Build the production collaborators from the config.
pub fn build_services(config: &Config) -> Result<DeploymentServices> {
    let store = JsonLinesSnapshotStore::open(&config.snapshot_store_path())?;
    Ok(DeploymentServices {
        remote: Arc::new(ShellClient::new(config.ssh.clone())),
        devices: Arc::new(StaticDirectory::from_entries(&config.devices)),
        snapshots: Arc::new(store),
        events: Arc::new(LogEventSink),
    })
}

pub fn manager(config: &Config) -> Result<BatchDeploymentManager> {
    Ok(BatchDeploymentManager::new(
        build_services(config)?,
        config.clone(),
    ))
}

pub fn timeline(config: &Config) -> Result<TimelineRollback> {
    let services = build_services(config)?;
    Ok(TimelineRollback::new(
        services.remote,
        services.devices,
        services.snapshots,
        services.events,
        config,
    ))
}
