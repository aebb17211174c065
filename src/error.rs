//! Error types for keywatch.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! specific failure conditions. Storage backends report `StorageError`
//! (see `storage`); everything above the storage layer reports `WatchError`.

use thiserror::Error;

use crate::record::RecordId;
use crate::storage::StorageError;

/// Validation errors that occur during input validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A record with no keywords.
    #[error("Keyword record must contain at least one keyword")]
    EmptyKeywords,

    /// A blank keyword.
    #[error("Keyword at index {index} is empty")]
    EmptyKeyword {
        /// Position of the blank keyword.
        index: usize,
    },

    /// A record without a channel.
    #[error("Channel id cannot be empty")]
    EmptyChannelId,

    /// A listing page past the end, or page zero.
    #[error("Page {page} is out of range (1..={total_pages})")]
    InvalidPage {
        /// Requested page, 1-based.
        page: usize,
        /// Pages available.
        total_pages: usize,
    },

    /// A configuration value that fails to parse or validate.
    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfig {
        /// Offending field or environment key.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Execution errors that occur while talking to collaborators.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The store or its feed connection is down.
    #[error("Remote store unavailable: {message}")]
    RemoteUnavailable {
        /// Detail from the failing component.
        message: String,
    },

    /// No record has this id.
    #[error("Keyword record not found: {id}")]
    RecordNotFound {
        /// The missing id.
        id: RecordId,
    },

    /// The chat platform rejected or dropped an alert.
    #[error("Alert dispatch to channel {channel_id} failed: {message}")]
    DispatchFailure {
        /// Target channel.
        channel_id: String,
        /// Detail from the failing component.
        message: String,
    },

    /// A remote call or wait exceeded its deadline.
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        /// Deadline that was exceeded.
        duration_ms: u64,
    },

    /// A feed or queue channel closed unexpectedly.
    #[error("Channel disconnected: {path}")]
    Disconnected {
        /// What was disconnected.
        path: String,
    },

    /// Any other backend failure.
    #[error("Storage error: {message}")]
    Storage {
        /// Detail from the failing component.
        message: String,
    },
}

/// Top-level error type for keywatch.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Invalid input.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A failure talking to the store or the platform.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// A bug or poisoned lock.
    #[error("Internal error: {message}")]
    Internal {
        /// Detail from the failing component.
        message: String,
    },
}

impl WatchError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a dispatch failure for the given channel.
    #[must_use]
    pub fn dispatch(channel_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::DispatchFailure {
            channel_id: channel_id.into(),
            message: message.into(),
        })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::Timeout { .. }
                    | ExecutionError::RemoteUnavailable { .. }
                    | ExecutionError::Disconnected { .. }
            ),
            Self::Internal { .. } => false,
        }
    }
}

impl From<StorageError> for WatchError {
    fn from(err: StorageError) -> Self {
        let exec = match err {
            StorageError::RecordNotFound(id) => ExecutionError::RecordNotFound { id },
            StorageError::Unavailable(message) => ExecutionError::RemoteUnavailable { message },
            StorageError::Timeout { duration_ms } => ExecutionError::Timeout { duration_ms },
            other => ExecutionError::Storage {
                message: other.to_string(),
            },
        };
        Self::Execution(exec)
    }
}

/// Result type alias for keywatch operations.
pub type WatchResult<T> = Result<T, WatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_empty_keyword() {
        let err = ValidationError::EmptyKeyword { index: 2 };
        let msg = format!("{err}");
        assert!(msg.contains("index 2"));
    }

    #[test]
    fn test_feed_disconnect_is_retryable() {
        let err: WatchError = ExecutionError::Disconnected {
            path: "/".to_string(),
        }
        .into();
        assert!(err.is_retryable());
        assert!(format!("{err}").contains("disconnected"));
    }

    #[test]
    fn test_dispatch_failure_message() {
        let err = WatchError::dispatch("c1", "socket closed");
        let msg = format!("{err}");
        assert!(msg.contains("c1"));
        assert!(msg.contains("socket closed"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_storage_error_mapping() {
        let id = RecordId::from("k1");
        let err: WatchError = StorageError::RecordNotFound(id.clone()).into();
        assert!(matches!(
            err,
            WatchError::Execution(ExecutionError::RecordNotFound { id: ref got }) if *got == id
        ));

        let err: WatchError = StorageError::Unavailable("down".to_string()).into();
        assert!(err.is_retryable());

        let err: WatchError = StorageError::Timeout { duration_ms: 10 }.into();
        assert!(err.is_retryable());

        let err: WatchError = StorageError::BackendError("boom".to_string()).into();
        assert!(err.is_execution());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_watch_error_retryable() {
        let err1: WatchError = ValidationError::EmptyKeywords.into();
        assert!(err1.is_validation());
        assert!(!err1.is_retryable());

        let err2 = WatchError::internal("unexpected state");
        assert!(!err2.is_retryable());
        assert!(format!("{err2}").contains("unexpected state"));
    }
}
