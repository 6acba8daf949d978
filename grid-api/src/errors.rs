//! # Grid Error Types
//!
//! Errors surfaced to callers of the placement grid, and the serializable
//! failure reason that travels back to a caller inside an `Answer`.
//!
//! ## Classification
//!
//! - Stale routing is recovered by re-forwarding and never appears here.
//! - A remote handler failure arrives as [`GridError::Remote`].
//! - No answer inside the correlation window becomes [`GridError::Timeout`].
//! - Malformed bytes are reported as [`GridError::Codec`] and the frame is dropped.
//!
//! ## Usage Example
//!
//! ```rust
//! use grid_api::errors::{FailureReason, GridError};
//!
//! fn describe(error: GridError) -> String {
//!     match error {
//!         GridError::Timeout => "no answer in time".to_string(),
//!         GridError::Remote(FailureReason::Handler(msg)) => format!("remote handler failed: {msg}"),
//!         other => other.to_string(),
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type for grid operations.
#[derive(Error, Debug)]
pub enum GridError {
    /// No answer arrived within the correlation timeout.
    #[error("Timeout")]
    Timeout,

    /// The owning node reported a failure.
    #[error("Remote failure: {0}")]
    Remote(FailureReason),

    /// Encoding or decoding a control message failed.
    #[error("Codec error: {0}")]
    Codec(String),

    /// The transport refused or lost the frame.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The destination node is not reachable.
    #[error("Node unavailable: {0}")]
    Unavailable(String),

    /// No factory registered under this protocol name.
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// The local queue no longer accepts messages.
    #[error("Mailbox closed for {0}")]
    MailboxClosed(String),

    /// The actor's handler returned an error.
    #[error("Handler failed: {0}")]
    Handler(String),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure carried inside an `Answer`.
///
/// Only this reduced form crosses the wire; the receiving side turns it back
/// into a [`GridError`] for the waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    #[error("timed out")]
    Timeout,
    #[error("handler failed: {0}")]
    Handler(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<&GridError> for FailureReason {
    fn from(error: &GridError) -> Self {
        match error {
            GridError::Timeout => FailureReason::Timeout,
            GridError::Remote(reason) => reason.clone(),
            GridError::Handler(msg) => FailureReason::Handler(msg.clone()),
            GridError::Unavailable(msg) => FailureReason::Unavailable(msg.clone()),
            GridError::MailboxClosed(path) => {
                FailureReason::Unavailable(format!("mailbox closed for {path}"))
            }
            GridError::UnknownProtocol(name) => {
                FailureReason::Rejected(format!("unknown protocol {name}"))
            }
            other => FailureReason::Rejected(other.to_string()),
        }
    }
}

impl From<GridError> for FailureReason {
    fn from(error: GridError) -> Self {
        FailureReason::from(&error)
    }
}

impl From<FailureReason> for GridError {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::Timeout => GridError::Timeout,
            other => GridError::Remote(other),
        }
    }
}
