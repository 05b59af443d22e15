//! Error types for streamheal-engine
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! Recovery itself reports outcomes as values; these errors cover setup
//! (configuration, scenarios) and misuse of the monitor API.

use thiserror::Error;

/// Main error type for streamheal-engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors bubbled up from the common crate
    #[error(transparent)]
    Common(#[from] streamheal_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation referenced a source that is not monitored
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// Source already attached under the same id
    #[error("Source already attached: {0}")]
    DuplicateSource(String),

    /// Scenario file is malformed
    #[error("Scenario error: {0}")]
    Scenario(String),
}

/// Convenience Result type using streamheal-engine Error
pub type Result<T> = std::result::Result<T, Error>;
