//! Error types for ViewSwap

use std::time::Duration;

use thiserror::Error;

/// Errors related to participant identity
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid identity format: {0}")]
    InvalidFormat(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}

/// Errors raised while validating participant input
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unsupported link: {0}")]
    UnsupportedLink(String),

    #[error("Link too long: {len} bytes, limit {max}")]
    LinkTooLong { len: usize, max: usize },

    #[error("Insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: String, available: String },
}

/// Errors related to the chat transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Retract failed: {0}")]
    RetractFailed(String),

    #[error("Participant not connected: {0}")]
    NotConnected(String),
}

/// Errors returned by external collaborators (verifier, membership, backup)
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Collaborator timed out after {0:?}")]
    Timeout(Duration),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Collaborator I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CollaboratorError {
    fn from(err: std::io::Error) -> Self {
        CollaboratorError::Io(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for CollaboratorError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        CollaboratorError::Timeout(Duration::ZERO)
    }
}
