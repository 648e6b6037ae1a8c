//! The persisted fallback queue.
//!
//! When no transport accepts a message, the delivery engine writes it here as
//! a [`QueueRecord`] for a later reprocessing job.

pub mod backends;
pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use backends::{FileQueueStore, MemoryQueueStore};
pub use config::{MemoryConfig, QueueConfig};
pub use error::{QueueError, Result, SerializationError, ValidationError};
pub use store::QueueStore;
pub use types::{QueueRecord, QueueStatus, QueuedAttachment, QueuedMessageId};
