//! Error types for cppsight

use thiserror::Error;

/// cppsight error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown severity: {0}")]
    UnknownSeverity(String),

    #[error("Invalid suppression: {0}")]
    Suppression(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for cppsight
pub type Result<T> = std::result::Result<T, Error>;
