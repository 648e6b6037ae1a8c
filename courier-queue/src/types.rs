use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier for a queued record
///
/// A ULID, used both as the tracking id and as the file name of the record.
/// ULIDs sort lexicographically by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueuedMessageId {
    id: ulid::Ulid,
}

impl QueuedMessageId {
    /// Parse an id from a file name like `01ARZ3NDEKTSV4RRFFQ69G5FAV.bin`
    ///
    /// Path separators, `..` and anything that is not a ULID are rejected.
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(".bin")?;
        let id = ulid::Ulid::from_string(stem).ok()?;

        Some(Self { id })
    }

    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Generate a new unique id
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    /// File name the record is stored under.
    #[must_use]
    pub fn filename(&self) -> String {
        format!("{}.bin", self.id)
    }

    /// Milliseconds since the Unix epoch encoded in the id
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

impl std::fmt::Display for QueuedMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl Serialize for QueuedMessageId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> Deserialize<'de> for QueuedMessageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { id })
    }
}

/// Where a queued record is in its life.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    /// Waiting for a reprocessing job.
    #[default]
    Pending,
    /// Delivered by a later run.
    Sent,
    /// Given up on.
    Failed,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        })
    }
}

/// The attachment carried by a queued message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedAttachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// A message handed to the queue because no transport accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub id: QueuedMessageId,
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
    pub text_body: Option<String>,
    pub attachment: Option<QueuedAttachment>,
    pub status: QueueStatus,
    /// Transport attempts made before the record was queued, plus any made
    /// by later reprocessing.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Sanitized reason for the most recent failure.
    pub last_error: Option<String>,
}

impl QueueRecord {
    /// A pending HTML record with a fresh id.
    #[must_use]
    pub fn new(
        sender: impl Into<String>,
        recipients: Vec<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: QueuedMessageId::generate(),
            sender: sender.into(),
            recipients,
            subject: subject.into(),
            body: body.into(),
            is_html: true,
            text_body: None,
            attachment: None,
            status: QueueStatus::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    #[must_use]
    pub fn with_text_body(mut self, text: impl Into<String>) -> Self {
        self.text_body = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: QueuedAttachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: u32, last_error: Option<String>) -> Self {
        self.attempts = attempts;
        self.last_error = last_error;
        self
    }

    /// Move to `status`, refreshing `updated_at`.
    pub fn transition(&mut self, status: QueueStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
