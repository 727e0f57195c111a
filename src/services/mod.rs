//! External collaborators of the engine and their implementations.

pub mod devices;
pub mod events;
pub mod memory;
pub mod remote;
pub mod ssh;
pub mod store;
