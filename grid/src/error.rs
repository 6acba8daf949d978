use grid_api::errors::GridError;
use thiserror::Error;

/// Errors related to local queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailboxError {
    #[error("Mailbox is full (capacity: {capacity})")]
    Full { capacity: usize },
    #[error("Mailbox is closed")]
    Closed,
}

/// Errors produced while encoding or decoding control messages.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to decode frame of {len} bytes: {source}")]
    Decode {
        len: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsupported wire version {0}")]
    Version(u8),
    #[error("Empty frame")]
    Empty,
}

impl From<CodecError> for GridError {
    fn from(error: CodecError) -> Self {
        GridError::Codec(error.to_string())
    }
}

impl MailboxError {
    pub fn into_grid_error(self, address: &str) -> GridError {
        match self {
            MailboxError::Closed => GridError::MailboxClosed(address.to_string()),
            full @ MailboxError::Full { .. } => {
                GridError::Unavailable(format!("{address}: {full}"))
            }
        }
    }
}
