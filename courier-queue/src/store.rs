use async_trait::async_trait;

use crate::{QueueRecord, QueuedMessageId, Result};

/// Durable storage for queued records.
///
/// Each record is stored independently, so concurrent `enqueue` calls never
/// contend on the same entry.
#[async_trait]
pub trait QueueStore: Send + Sync + std::fmt::Debug {
    /// Persist a new record under its id.
    async fn enqueue(&self, record: &QueueRecord) -> Result<QueuedMessageId>;

    /// All record ids, oldest first.
    async fn list(&self) -> Result<Vec<QueuedMessageId>>;

    async fn read(&self, id: &QueuedMessageId) -> Result<QueueRecord>;

    /// Replace an existing record (status changes by a reprocessing job).
    async fn update(&self, record: &QueueRecord) -> Result<()>;

    async fn delete(&self, id: &QueuedMessageId) -> Result<()>;
}
