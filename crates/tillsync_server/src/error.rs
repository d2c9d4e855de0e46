//! Error types for the sync server.

use thiserror::Error;
use tillsync_protocol::ProtocolError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that fail a whole request.
///
/// Problems with individual records are not errors: they are reported as
/// per-record outcomes in the push response.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format or size.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The device speaks another protocol version.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    ProtocolMismatch {
        /// Version this server speaks.
        expected: u16,
        /// Version the device sent.
        got: u16,
    },

    /// Request or response body could not be (de)serialized.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// No handler for the requested path.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),
}

impl ServerError {
    /// Returns true if the device sent something the server cannot accept.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ServerError::Codec(ProtocolError::Encode(_)))
    }
}
