use std::sync::Arc;

use serde::Deserialize;

use crate::{FileQueueStore, MemoryQueueStore, QueueStore, Result};

/// Selects the queue store at runtime.
///
/// File-backed queue in RON config:
/// ```ron
/// queue: (
///     type: "File",
///     path: "/var/spool/courier",
/// ),
/// ```
///
/// Memory-backed queue with a capacity limit:
/// ```ron
/// queue: (
///     type: "Memory",
///     capacity: 1000,
/// ),
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum QueueConfig {
    File(FileQueueStore),
    Memory(MemoryConfig),
}

/// Configuration for the memory-backed queue
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MemoryConfig {
    /// Maximum number of records to hold (omit for unlimited)
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::File(FileQueueStore::default())
    }
}

impl QueueConfig {
    /// The directory of a file-backed queue.
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File(store) => Some(store.path()),
            Self::Memory(_) => None,
        }
    }

    /// Build the configured store, creating the queue directory if needed.
    ///
    /// # Errors
    /// Returns an error if a file-backed queue directory cannot be prepared.
    pub async fn into_store(self) -> Result<Arc<dyn QueueStore>> {
        match self {
            Self::File(store) => {
                store.init().await?;
                Ok(Arc::new(store))
            }
            Self::Memory(MemoryConfig { capacity: None }) => Ok(Arc::new(MemoryQueueStore::new())),
            Self::Memory(MemoryConfig {
                capacity: Some(capacity),
            }) => Ok(Arc::new(MemoryQueueStore::with_capacity(capacity))),
        }
    }
}
