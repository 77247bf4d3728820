//! Error types for the exchange engine

use thiserror::Error;

use viewswap_storage::StorageError;

/// Errors that can occur while handling participant actions
#[derive(Debug, Error)]
pub enum EngineError {
    /// Storage error (after retries)
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Create a new Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
