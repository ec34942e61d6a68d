use crate::models::{TaskId, UploadStatus};
use crate::utils::validation::ValidationError;
use thiserror::Error;

/// Failure of an outbound call or of a task's unit of work.
///
/// `Clone` because one refresh outcome is handed to every request waiting on it.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server responded {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Processing failed: {0}")]
    ServerProcessing(String),

    #[error("Processing timed out after {attempts} status checks")]
    Timeout { attempts: u32 },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Auth(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

/// Misuse of the coordinator: the request does not fit the task's current state.
#[derive(Error, Debug, Clone)]
pub enum CoordinatorError {
    #[error("Upload task {0} not found")]
    NotFound(TaskId),

    #[error("Task cannot be removed while {0}")]
    RemovalRejected(UploadStatus),

    #[error("Task cannot move from {from} to {to}")]
    InvalidTransition { from: UploadStatus, to: UploadStatus },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}
