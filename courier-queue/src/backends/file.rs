use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use courier_common::internal;
use serde::Deserialize;
use tokio::fs;

use crate::{
    QueueError, QueueRecord, QueueStore, QueuedMessageId, Result, error::ValidationError,
};

const TEMP_PREFIX: &str = ".tmp_";

/// Directories a queue must never be placed in.
const SYSTEM_DIRECTORIES: [&str; 9] = [
    "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
];

/// File-based queue store
///
/// One bincode file per record, named `{ulid}.bin`.
///
/// # Atomicity
/// Records are written to `.tmp_{ulid}.bin` and renamed into place, so a
/// crash never leaves a half-written record visible to `list`.
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    path: PathBuf,
}

impl Default for FileQueueStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/courier"),
        }
    }
}

impl<'de> Deserialize<'de> for FileQueueStore {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FileQueueStoreHelper {
            path: PathBuf,
        }

        let helper = FileQueueStoreHelper::deserialize(deserializer)?;
        Self::new(helper.path).map_err(serde::de::Error::custom)
    }
}

impl FileQueueStore {
    /// A store rooted at `path`. The directory is created by [`Self::init`].
    ///
    /// # Errors
    /// Returns an error if the path is relative, contains `..`, or points
    /// into a system directory.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        Self::validate_path(&path)?;
        Ok(Self { path })
    }

    fn validate_path(path: &Path) -> std::result::Result<(), ValidationError> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(ValidationError::ParentComponent(path.display().to_string()));
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(path.display().to_string()));
        }

        if let Some(prefix) = SYSTEM_DIRECTORIES
            .into_iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(ValidationError::SystemDirectory {
                prefix,
                path: path.display().to_string(),
            });
        }

        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the queue directory if needed and clear stale temporary files.
    ///
    /// # Errors
    /// - If the directory cannot be created or read
    /// - If the path exists but is not a directory
    pub async fn init(&self) -> Result<()> {
        internal!("Initialising queue at {} ...", self.path.display());

        if !fs::try_exists(&self.path).await? {
            internal!("{} does not exist, creating...", self.path.display());
            fs::create_dir_all(&self.path).await?;
        } else if !fs::metadata(&self.path).await?.is_dir() {
            return Err(ValidationError::NotDirectory(self.path.display().to_string()).into());
        }

        let mut entries = fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                let _ = fs::remove_file(entry.path()).await;
            }
        }

        Ok(())
    }

    fn record_path(&self, id: &QueuedMessageId) -> PathBuf {
        self.path.join(id.filename())
    }

    async fn write_atomic(&self, record: &QueueRecord) -> Result<()> {
        let filename = record.id.filename();
        let temp_path = self.path.join(format!("{TEMP_PREFIX}{filename}"));

        let bytes = bincode::serde::encode_to_vec(record, bincode::config::standard())?;
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, self.path.join(&filename)).await?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn enqueue(&self, record: &QueueRecord) -> Result<QueuedMessageId> {
        if fs::try_exists(self.record_path(&record.id)).await? {
            return Err(QueueError::AlreadyExists(record.id.clone()));
        }

        self.write_atomic(record).await?;

        internal!(
            level = DEBUG,
            "Queued message {} to {}",
            record.id,
            self.path.display()
        );

        Ok(record.id.clone())
    }

    async fn list(&self) -> Result<Vec<QueuedMessageId>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            if let Some(id) = QueuedMessageId::from_filename(&filename.to_string_lossy()) {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn read(&self, id: &QueuedMessageId) -> Result<QueueRecord> {
        let bytes = match fs::read(self.record_path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(QueueError::NotFound(id.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let (record, _) = bincode::serde::decode_from_slice::<QueueRecord, _>(
            &bytes,
            bincode::config::standard(),
        )?;
        Ok(record)
    }

    async fn update(&self, record: &QueueRecord) -> Result<()> {
        if !fs::try_exists(self.record_path(&record.id)).await? {
            return Err(QueueError::NotFound(record.id.clone()));
        }
        self.write_atomic(record).await
    }

    async fn delete(&self, id: &QueuedMessageId) -> Result<()> {
        match fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(QueueError::NotFound(id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
