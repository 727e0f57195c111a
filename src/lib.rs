//! Config Deploy Library
//!
//! Atomic multi-file configuration deployment to device fleets, with
//! snapshot-based in-batch rollback and time-window rollback.

pub mod cli;
pub mod core;
pub mod error;
pub mod models;
pub mod preflight;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
