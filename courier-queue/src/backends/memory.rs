use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::{QueueError, QueueRecord, QueueStore, QueuedMessageId, Result};

/// In-memory queue store
///
/// Records live in a `HashMap` behind an `RwLock`. Intended for tests and for
/// deployments where losing deferred mail on restart is acceptable.
///
/// # Capacity Management
/// With a capacity set, `enqueue` fails once that many records are held. A
/// capacity of zero refuses every record, which simulates an unavailable store.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueStore {
    records: Arc<RwLock<HashMap<QueuedMessageId, QueueRecord>>>,
    /// Maximum number of records to hold (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryQueueStore {
    /// Create an empty store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store holding at most `capacity` records
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Number of records held
    ///
    /// Recovers gracefully if the lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, record: &QueueRecord) -> Result<QueuedMessageId> {
        let mut records = self.records.write()?;

        if records.contains_key(&record.id) {
            return Err(QueueError::AlreadyExists(record.id.clone()));
        }
        if let Some(capacity) = self.capacity
            && records.len() >= capacity
        {
            return Err(QueueError::CapacityExceeded {
                len: records.len(),
                capacity,
            });
        }

        records.insert(record.id.clone(), record.clone());
        Ok(record.id.clone())
    }

    async fn list(&self) -> Result<Vec<QueuedMessageId>> {
        let mut ids: Vec<_> = self.records.read()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn read(&self, id: &QueuedMessageId) -> Result<QueueRecord> {
        self.records
            .read()?
            .get(id)
            .cloned()
            .ok_or_else(|| QueueError::NotFound(id.clone()))
    }

    async fn update(&self, record: &QueueRecord) -> Result<()> {
        let mut records = self.records.write()?;
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(QueueError::NotFound(record.id.clone())),
        }
    }

    async fn delete(&self, id: &QueuedMessageId) -> Result<()> {
        self.records
            .write()?
            .remove(id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueueStatus;

    fn record(subject: &str) -> QueueRecord {
        QueueRecord::new(
            "noreply@example.com",
            vec!["user@example.com".to_string()],
            subject,
            "<p>Hi</p>",
        )
    }

    #[tokio::test]
    async fn test_memory_store_basic_operations() {
        let store = MemoryQueueStore::new();
        let record = record("first");

        let id = store.enqueue(&record).await.expect("Failed to enqueue");
        assert_eq!(id, record.id);

        let ids = store.list().await.expect("Failed to list");
        assert_eq!(ids, vec![id.clone()]);

        let read = store.read(&id).await.expect("Failed to read");
        assert_eq!(read, record);

        store.delete(&id).await.expect("Failed to delete");
        assert!(store.is_empty());
        assert!(matches!(
            store.read(&id).await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_capacity_limit() {
        let store = MemoryQueueStore::with_capacity(2);

        store.enqueue(&record("1")).await.expect("First enqueue");
        store.enqueue(&record("2")).await.expect("Second enqueue");

        let result = store.enqueue(&record("3")).await;
        assert!(matches!(
            result,
            Err(QueueError::CapacityExceeded {
                len: 2,
                capacity: 2
            })
        ));

        let ids = store.list().await.expect("Failed to list");
        store.delete(&ids[0]).await.expect("Failed to delete");
        assert!(store.enqueue(&record("3")).await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_capacity_refuses_everything() {
        let store = MemoryQueueStore::with_capacity(0);
        assert!(store.enqueue(&record("x")).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_and_update() {
        let store = MemoryQueueStore::new();
        let mut record = record("dup");
        store.enqueue(&record).await.unwrap();

        assert!(matches!(
            store.enqueue(&record).await,
            Err(QueueError::AlreadyExists(_))
        ));

        record.transition(QueueStatus::Failed);
        store.update(&record).await.unwrap();
        assert_eq!(
            store.read(&record.id).await.unwrap().status,
            QueueStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_concurrent_enqueue() {
        let store = MemoryQueueStore::new();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.enqueue(&record(&i.to_string())).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.len(), 16);
    }
}
