//! Error types for backend transports
//!
//! Callers of the structured helpers only need one branch:
//! [`ClientError::is_upstream`] separates "the backend answered with a
//! JSON-RPC error" from every transport or infrastructure failure.

use std::time::Duration;

use mcprouter_protocol::{JsonRpcError, ProtocolError, RequestId};
use thiserror::Error;

/// Result type for transport operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Main error type for backend transports
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// The backend descriptor cannot select or start a transport
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An outgoing or incoming message is not valid JSON-RPC 2.0
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A result payload does not match the expected shape
    #[error("malformed result: {0}")]
    MalformedResult(String),

    /// No response arrived within the request ceiling
    #[error("timeout waiting for response after {} seconds", .0.as_secs())]
    Timeout(Duration),

    /// The transport closed while the call was pending
    #[error("client closed with no response")]
    ClosedNoResponse,

    /// The backend answered with a JSON-RPC error
    ///
    /// Carries the backend's code, message and data verbatim.
    #[error("upstream error: {0}")]
    Upstream(JsonRpcError),

    /// The backend's diagnostic stream failed; the transport is unusable
    #[error("stream failure: {0}")]
    StreamFailure(String),

    /// Closing the backend's input stream exceeded its ceiling
    #[error("timeout while closing stdin")]
    StdinCloseTimeout,

    /// The backend process did not exit in time and was killed
    #[error("process killed after timeout")]
    KilledAfterTimeout,

    /// The backend process could not be started
    #[error("failed to start command: {0}")]
    Spawn(#[source] std::io::Error),

    /// Reading from or writing to the backend failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend process exited unsuccessfully during shutdown
    #[error("backend process exited with {0}")]
    ProcessExit(String),

    /// The remote backend could not be reached or answered with a non-2xx status
    #[error("HTTP error: {message}")]
    Http {
        /// Failure description
        message: String,
        /// HTTP status, when one was received
        status: Option<u16>,
    },

    /// A request with this id is already waiting for its response
    #[error("request id {0} is already in flight")]
    DuplicateRequestId(RequestId),
}

impl ClientError {
    /// Create an invalid configuration error
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Create a malformed message error
    pub fn malformed_message(message: impl Into<String>) -> Self {
        Self::MalformedMessage(message.into())
    }

    /// Create an HTTP error without a status
    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
            status: None,
        }
    }

    /// Whether the backend itself reported this error
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }

    /// The backend's JSON-RPC error, if this is an upstream error
    pub fn as_upstream(&self) -> Option<&JsonRpcError> {
        match self {
            Self::Upstream(error) => Some(error),
            _ => None,
        }
    }

    /// Whether the request ceiling elapsed
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::MalformedMessage(message) => Self::MalformedMessage(message),
            ProtocolError::MalformedResult(message) => Self::MalformedResult(message),
            other => Self::MalformedMessage(other.to_string()),
        }
    }
}

impl From<JsonRpcError> for ClientError {
    fn from(err: JsonRpcError) -> Self {
        Self::Upstream(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_branch() {
        let err = ClientError::from(JsonRpcError::new(-32001, "quota exhausted"));
        assert!(err.is_upstream());
        assert_eq!(err.as_upstream().map(|e| e.code), Some(-32001));

        let err = ClientError::ClosedNoResponse;
        assert!(!err.is_upstream());
        assert!(err.as_upstream().is_none());
    }

    #[test]
    fn test_timeout_display() {
        let err = ClientError::Timeout(Duration::from_secs(30));
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "timeout waiting for response after 30 seconds"
        );
    }

    #[test]
    fn test_protocol_error_conversion() {
        let err: ClientError = ProtocolError::malformed_result("missing field `tools`").into();
        assert!(matches!(err, ClientError::MalformedResult(ref m) if m.contains("tools")));
    }
}
