//! Data models.

pub mod config;
pub mod request;
pub mod rollback;
pub mod snapshot;
pub mod transaction;
