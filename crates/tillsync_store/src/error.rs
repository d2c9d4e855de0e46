//! Error types for the local store.

use std::io;
use thiserror::Error;
use tillsync_protocol::ProtocolError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the local store, the journal and change capture.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The journal contains a structurally invalid frame.
    #[error("journal corrupted: {0}")]
    Corrupted(String),

    /// A journal frame failed its checksum.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the frame.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// A journal batch could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// Capturing a local change failed; the transaction was not committed.
    #[error("capture failed: {0}")]
    Capture(String),

    /// A previous write failed and left the journal in an unknown state.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Creates a capture error.
    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture(message.into())
    }

    /// Returns true if the store can no longer be trusted for writes.
    ///
    /// Capture errors only abort the one local transaction; everything else
    /// means storage itself is broken or unreachable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StoreError::Capture(_))
    }
}

impl From<ProtocolError> for StoreError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Encode(msg) => StoreError::Encode(msg),
            ProtocolError::Decode(msg) => StoreError::Corrupted(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_capture_errors_are_recoverable() {
        assert!(!StoreError::capture("bad snapshot").is_fatal());
        assert!(StoreError::corrupted("bad magic").is_fatal());
        assert!(StoreError::Locked.is_fatal());
        assert!(StoreError::Unavailable("poisoned".into()).is_fatal());
    }

    #[test]
    fn decode_failures_are_corruption() {
        let err: StoreError = ProtocolError::Decode("eof".into()).into();
        assert!(matches!(err, StoreError::Corrupted(_)));
    }
}
