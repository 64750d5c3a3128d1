//! Error types for the Quotaguard service.

use thiserror::Error;

/// Main error type for Quotaguard operations.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A URL path pattern that cannot be compiled
    #[error("Invalid path pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    /// Counter store errors
    #[error("Counter store error: {0}")]
    Store(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for GuardError {
    fn from(err: config::ConfigError) -> Self {
        GuardError::Config(err.to_string())
    }
}

/// Result type alias for Quotaguard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
