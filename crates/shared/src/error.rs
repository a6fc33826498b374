use std::time::Duration;

use thiserror::Error;

/// Maximum accepted message length, in UTF-16 code units.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Input rejected before anything reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message is empty")]
    EmptyInput,
    #[error("Message too long ({len}/{max})")]
    MessageTooLong { len: usize, max: usize },
    #[error("Please choose a PDF file first")]
    NoFileSelected,
    #[error("Please upload a PDF file (got {media_type})")]
    NotPdf { media_type: String },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("webhook request failed: {0}")]
    Http(String),
    #[error("webhook returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("webhook request timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("failed to serialize conversation log: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ValidationError {
    /// Whether the rejection should be shown to the user. Blank input is dropped silently.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::EmptyInput)
    }
}
