//! Decode failures for the JSON-RPC envelope

use thiserror::Error;

/// Result type for envelope operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while decoding protocol messages
///
/// Both variants describe local decode failures. A backend that answers with
/// a JSON-RPC error object is not a decode failure; that error is carried by
/// [`crate::Response::error`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The bytes are not a JSON-RPC 2.0 message (bad JSON, wrong version tag,
    /// or missing required members)
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The `result` member does not match the shape the caller expected
    #[error("malformed result: {0}")]
    MalformedResult(String),
}

impl ProtocolError {
    /// Create a malformed message error
    pub fn malformed_message(message: impl Into<String>) -> Self {
        Self::MalformedMessage(message.into())
    }

    /// Create a malformed result error
    pub fn malformed_result(message: impl Into<String>) -> Self {
        Self::MalformedResult(message.into())
    }
}
