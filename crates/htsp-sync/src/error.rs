//! Error types for the driver.

use thiserror::Error;

/// Errors that can occur during driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A session is already running.
    #[error("a sync session is already running")]
    Busy,

    /// The worker runtime could not be built.
    #[error("runtime error: {0}")]
    Runtime(#[source] std::io::Error),

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// Configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Logging was already initialised by someone else.
    #[error("logging init failed: {0}")]
    Logging(String),
}

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;
