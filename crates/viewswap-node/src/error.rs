//! Error types for the exchange node

use thiserror::Error;

use viewswap_core::CollaboratorError;
use viewswap_engine::EngineError;
use viewswap_storage::StorageError;

/// Errors that can occur in the exchange node
#[derive(Debug, Error)]
pub enum NodeError {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Collaborator error (verifier, membership, backup sink)
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// Node already started
    #[error("Node already started")]
    AlreadyStarted,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl NodeError {
    /// Create a new Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        NodeError::Io(e.to_string())
    }
}

/// Result type alias for node operations
pub type NodeResult<T> = Result<T, NodeError>;
