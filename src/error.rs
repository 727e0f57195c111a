//! Error types for the deployment engine.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the deployment engine.
#[derive(Error, Debug)]
pub enum Error {
    // Request / pre-flight errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Lookup errors
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    // Runtime deployment / rollback errors for a specific file
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Transport errors
    #[error("Connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    #[error("Remote command `{command}` exited with status {exit_status}: {stderr}")]
    Command {
        command: String,
        exit_status: i32,
        stderr: String,
    },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    // State machine errors
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // Settings errors
    #[error("Invalid settings: {0}")]
    Settings(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // TOML errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Error::Other(msg.into())
    }

    /// Create a connection error for a host.
    pub fn connection<H: Into<String>, M: Into<String>>(host: H, message: M) -> Self {
        Error::Connection {
            host: host.into(),
            message: message.into(),
        }
    }
}
