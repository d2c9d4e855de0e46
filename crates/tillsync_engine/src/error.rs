//! Error types for the sync engine.

use thiserror::Error;
use tillsync_protocol::ProtocolError;
use tillsync_store::StoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote answered with an error status.
    #[error("remote error {status}: {message}")]
    Remote {
        /// HTTP-style status code.
        status: u16,
        /// Body of the error reply.
        message: String,
    },

    /// A message could not be encoded or decoded, or violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local store failure.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// The engine was configured inconsistently.
    #[error("configuration error: {0}")]
    Config(String),

    /// A network call exceeded the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// The pass was cancelled by shutdown.
    #[error("sync cancelled")]
    Cancelled,

    /// The transport reports it cannot reach the remote.
    #[error("not connected to server")]
    NotConnected,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried within the same pass.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if sync must stop until the host intervenes.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Storage(e) => e.is_fatal(),
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::Remote {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!SyncError::Remote {
            status: 400,
            message: "bad request".into()
        }
        .is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::NotConnected.is_retryable());
    }

    #[test]
    fn storage_corruption_is_fatal() {
        let err = SyncError::from(StoreError::corrupted("bad frame"));
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        assert!(!SyncError::from(StoreError::capture("blank id")).is_fatal());
        assert!(!SyncError::Timeout.is_fatal());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::NotConnected.to_string(), "not connected to server");
        let err = SyncError::Remote {
            status: 409,
            message: "protocol version 2 not supported".into(),
        };
        assert!(err.to_string().contains("409"));
    }
}
