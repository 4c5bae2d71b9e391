//! Error types for the Toolbridge core.

use thiserror::Error;

/// Main error type for core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration errors (invalid JSON/YAML, missing fields, conflicts)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Runtime errors (unknown tool, render failure, invalid arguments)
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Connection errors (timeout, refused, server in failed state)
    #[error("Connection error: {0}")]
    Connection(String),

    /// HTTP errors (failed API calls, non-2xx responses)
    #[error("HTTP error: {0}")]
    Http(String),

    /// A requested composition has no backing implementation yet
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
