//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A value could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// Bytes could not be decoded into the expected message.
    #[error("decode error: {0}")]
    Decode(String),
}
