//! Error types for the common crate
//!
//! This module defines the common error types used throughout Task Log Tee.

use thiserror::Error;

/// Result type for Task Log Tee operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Task Log Tee operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Template rendering error
    #[error("Template error: {0}")]
    Template(String),

    /// Invalid argument error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if the error is a template error
    pub fn is_template(&self) -> bool {
        matches!(self, Error::Template(_))
    }

    /// Returns true if the error is a configuration error
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Returns true if the error is an IO error
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}
