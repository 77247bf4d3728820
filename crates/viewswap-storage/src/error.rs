//! Error types for viewswap-storage
//!
//! This module defines the error types used throughout the storage crate.

use std::fmt::Display;

use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// Requested item was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Error during serialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Participant identity conversion error
    #[error("Identity error: {0}")]
    Identity(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Write transaction failed to commit
    #[error("Commit failed: {0}")]
    Commit(String),

    /// A balance change would leave the representable range
    #[error("Balance overflow for participant {0}")]
    BalanceOverflow(String),

    /// An encoded record exceeds the segment record limit
    #[error("Record too large: {len} bytes, limit {max}")]
    RecordTooLarge { len: usize, max: usize },

    /// A segment file could not be parsed
    #[error("Corrupt segment {segment}: {reason}")]
    CorruptSegment { segment: String, reason: String },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl StorageError {
    /// Create a new NotFound error
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new Deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Create a new Identity error
    pub fn identity(message: impl Into<String>) -> Self {
        Self::Identity(message.into())
    }

    /// Create a new BalanceOverflow error
    pub fn balance_overflow(participant: impl Display) -> Self {
        Self::BalanceOverflow(participant.to_string())
    }

    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Whether retrying the same operation may succeed
    ///
    /// I/O, database and commit failures can be caused by a busy disk or a
    /// momentarily unavailable file. Missing rows and undecodable data will
    /// fail the same way every time.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Io(_) | StorageError::Database(_) | StorageError::Commit(_)
        )
    }
}

/// Convert from postcard Error to StorageError
impl From<postcard::Error> for StorageError {
    fn from(err: postcard::Error) -> Self {
        StorageError::Deserialization(err.to_string())
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::Commit(err.to_string())
    }
}

impl From<viewswap_core::IdentityError> for StorageError {
    fn from(err: viewswap_core::IdentityError) -> Self {
        StorageError::Identity(err.to_string())
    }
}
