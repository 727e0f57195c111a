//! Core engine modules.

pub mod diff;
pub mod executor;
pub mod files;
pub mod manager;
pub mod registry;
pub mod rollback;
pub mod snapshot;
pub mod timeline;

pub use manager::{BatchDeploymentManager, DeploymentServices};
pub use registry::{TransactionFilter, TransactionRegistry};
pub use timeline::TimelineRollback;
