//! Error types shared across termhub crates

use thiserror::Error;

/// Result type alias for termhub operations
pub type Result<T> = std::result::Result<T, TermhubError>;

/// Main error type for termhub
#[derive(Error, Debug)]
pub enum TermhubError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown output schema: {0}")]
    UnknownSchema(String),
}
