use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

/// Media type used when content sniffing cannot identify a file.
pub const UNKNOWN_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A selected file: its payload plus the name, media type and size the user
/// agent declared for it.
#[derive(Debug, Clone, Serialize)]
pub struct FileRef {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(skip)]
    pub data: Bytes,
}

impl FileRef {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size: data.len() as u64,
            data,
        }
    }

    /// Reads a file from disk, sniffing its media type from the content.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let data = Bytes::from(tokio::fs::read(path).await?);
        let mime_type = infer::get(&data)
            .map(|kind| kind.mime_type())
            .unwrap_or(UNKNOWN_MIME_TYPE);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        Ok(Self::new(name, mime_type, data))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Processing,
    Completed,
    Error,
}

impl UploadStatus {
    /// Uploading and Processing tasks are in flight and cannot be removed.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Uploading | Self::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Edges of the per-task state machine. Nothing ever moves backwards.
    pub fn can_advance_to(self, next: Self) -> bool {
        use UploadStatus::*;
        matches!(
            (self, next),
            (Pending, Uploading)
                | (Uploading, Processing)
                | (Uploading, Error)
                | (Processing, Completed)
                | (Processing, Error)
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadTask {
    pub id: TaskId,
    pub file: FileRef,
    pub status: UploadStatus,
    pub progress: u8,
    pub document_type: Option<String>,
    pub document_id: Option<String>,
    pub error: Option<String>,
    pub validation_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UploadTask {
    pub fn new(file: FileRef) -> Self {
        Self {
            id: TaskId::new(),
            file,
            status: UploadStatus::Pending,
            progress: 0,
            document_type: None,
            document_id: None,
            error: None,
            validation_message: None,
            created_at: Utc::now(),
        }
    }
}

/// Upload destination chosen when the user confirms a task.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub venture_id: String,
    pub document_type: String,
}

impl UploadTarget {
    pub fn new(venture_id: impl Into<String>, document_type: impl Into<String>) -> Self {
        Self {
            venture_id: venture_id.into(),
            document_type: document_type.into(),
        }
    }
}

// Wire types

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: None,
            expires_in: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingStatusResponse {
    pub status: RemoteStatus,
    #[serde(default)]
    pub error: Option<String>,
}
