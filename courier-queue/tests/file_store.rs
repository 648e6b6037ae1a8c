use std::sync::Arc;

use courier_queue::{
    FileQueueStore, QueueConfig, QueueError, QueueRecord, QueueStatus, QueueStore,
    QueuedAttachment,
};
use pretty_assertions::assert_eq;

fn record(subject: &str) -> QueueRecord {
    QueueRecord::new(
        "noreply@example.com",
        vec!["user@example.com".to_string(), "other@example.com".to_string()],
        subject,
        "<p>Hi</p>",
    )
    .with_text_body("Hi")
    .with_attempts(2, Some("smtp: connect timed out".to_string()))
}

async fn store(dir: &tempfile::TempDir) -> FileQueueStore {
    let store = FileQueueStore::new(dir.path().join("queue")).unwrap();
    store.init().await.unwrap();
    store
}

#[tokio::test]
async fn test_file_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;

    let original = record("Test").with_attachment(QueuedAttachment {
        filename: "invoice.pdf".to_string(),
        content_type: "application/pdf".to_string(),
        data: vec![0, 1, 2, 255],
    });
    let id = store.enqueue(&original).await.unwrap();

    assert_eq!(store.list().await.unwrap(), vec![id.clone()]);
    assert!(dir.path().join("queue").join(id.filename()).exists());

    let read = store.read(&id).await.unwrap();
    assert_eq!(read, original);
    assert_eq!(read.status, QueueStatus::Pending);
    assert_eq!(read.attempts, 2);
}

#[tokio::test]
async fn test_file_store_update_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;

    let mut queued = record("Update me");
    store.enqueue(&queued).await.unwrap();

    queued.transition(QueueStatus::Sent);
    store.update(&queued).await.unwrap();
    assert_eq!(store.read(&queued.id).await.unwrap().status, QueueStatus::Sent);

    store.delete(&queued.id).await.unwrap();
    assert!(store.list().await.unwrap().is_empty());
    assert!(matches!(
        store.read(&queued.id).await,
        Err(QueueError::NotFound(_))
    ));
    assert!(matches!(
        store.delete(&queued.id).await,
        Err(QueueError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_list_ignores_foreign_and_temporary_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    let queue_dir = dir.path().join("queue");

    std::fs::write(queue_dir.join("notes.txt"), b"hello").unwrap();
    std::fs::write(queue_dir.join("not-a-ulid.bin"), b"junk").unwrap();

    let id = store.enqueue(&record("Keep")).await.unwrap();
    let leftover = queue_dir.join(format!(".tmp_{}", id.filename()));
    std::fs::write(&leftover, b"partial").unwrap();

    assert_eq!(store.list().await.unwrap(), vec![id]);

    // init clears leftovers from an interrupted write
    store.init().await.unwrap();
    assert!(!leftover.exists());
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_enqueues_do_not_clash() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(store(&dir).await);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.enqueue(&record(&format!("msg {i}"))).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.list().await.unwrap().len(), 8);
}

#[tokio::test]
async fn test_init_rejects_file_in_place_of_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("occupied");
    std::fs::write(&path, b"").unwrap();

    let store = FileQueueStore::new(&path).unwrap();
    assert!(matches!(store.init().await, Err(QueueError::Validation(_))));
}

#[tokio::test]
async fn test_config_into_store_creates_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("queue");

    let config = QueueConfig::File(FileQueueStore::new(&path).unwrap());
    let store = config.into_store().await.unwrap();

    assert!(path.is_dir());
    store.enqueue(&record("via config")).await.unwrap();
    assert_eq!(store.list().await.unwrap().len(), 1);
}
