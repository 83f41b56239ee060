//! Error types for the cross-filter core

use thiserror::Error;

/// Errors that can occur in core operations
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid composite filter: {0}")]
    InvalidComposite(String),

    #[error("Unknown filter operator '{0}'")]
    UnknownOperator(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
