//! Error types and result definitions

use crate::registry::QueryRegistryError;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for the continuous query engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// The query text or pattern is malformed
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The query is well-formed but uses algebra or a pattern shape the engine does not support
    #[error("Incompatible query: {0}")]
    IncompatibleQuery(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A data line could not be parsed into a tuple
    #[error("Parse error: {0}")]
    Parse(String),

    /// The query table rejected the registration or lookup
    #[error("Registry error: {0}")]
    Registry(#[from] QueryRegistryError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<regex::Error> for EngineError {
    fn from(err: regex::Error) -> Self {
        EngineError::InvalidQuery(err.to_string())
    }
}
