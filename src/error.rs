//! Error taxonomy for message processing.
//!
//! Every collaborator error reaches the caller unchanged, wrapped in
//! [`ProcessError::Repository`]. Only two situations are absorbed as success:
//! an unrecognised event type and an event that already carries an outcome.

use thiserror::Error;

use crate::repository::RepositoryError;

pub type ProcessResult<T> = Result<T, ProcessError>;

/// Errors returned by [`crate::EventProcessor::handle`].
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Payload could not be decoded into the expected shape
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A repository call failed (including "not found" at the event lookup)
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The caller cancelled processing
    #[error("processing cancelled")]
    Cancelled,

    /// The processing deadline passed before a collaborator answered
    #[error("processing deadline exceeded")]
    DeadlineExceeded,
}

impl ProcessError {
    /// Whether redelivering the same message may succeed.
    ///
    /// Malformed payloads never will; everything else is infrastructure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Decode { .. })
    }

    /// Whether this is a "no such record" failure from a repository
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Repository(e) if e.is_not_found())
    }

    /// Whether processing stopped because of cancellation or a deadline
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}
