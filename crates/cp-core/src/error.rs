//! Error types for crimepanel

use thiserror::Error;

/// crimepanel error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// A named column, coefficient or artifact does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unsupported configuration (unknown mode string, unknown estimator, ...)
    #[error("Unsupported configuration: {0}")]
    Unsupported(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
