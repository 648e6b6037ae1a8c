//! Error types for the courier-queue crate.

use std::io;

use thiserror::Error;

use crate::QueuedMessageId;

/// Every queue operation returns this error type.
#[derive(Debug, Error)]
pub enum QueueError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Record not found in the queue.
    #[error("Record not found: {0}")]
    NotFound(QueuedMessageId),

    /// Record with this id is already queued.
    #[error("Record already exists: {0}")]
    AlreadyExists(QueuedMessageId),

    /// Queue directory validation failed.
    #[error("Queue validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The store refuses further records.
    #[error("Queue capacity exceeded: {len}/{capacity} records")]
    CapacityExceeded { len: usize, capacity: usize },

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Queue directory validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Queue path cannot contain '..' components: {0}")]
    ParentComponent(String),

    #[error("Queue path must be absolute: {0}")]
    NotAbsolute(String),

    #[error("Queue path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: &'static str, path: String },

    #[error("Queue path is not a directory: {0}")]
    NotDirectory(String),
}

/// Specialized `Result` type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

impl<T> From<std::sync::PoisonError<T>> for QueueError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

impl From<bincode::error::EncodeError> for QueueError {
    fn from(e: bincode::error::EncodeError) -> Self {
        Self::Serialization(e.into())
    }
}

impl From<bincode::error::DecodeError> for QueueError {
    fn from(e: bincode::error::DecodeError) -> Self {
        Self::Serialization(e.into())
    }
}
