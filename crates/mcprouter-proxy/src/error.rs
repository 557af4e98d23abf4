//! Error types for mcprouter-proxy
//!
//! Backend failures are wrapped unchanged so a JSON-RPC error reported by a
//! backend keeps its original code when it is relayed to the client.

use mcprouter_client::ClientError;
use mcprouter_protocol::JsonRpcError;
use thiserror::Error;

use crate::sse::SseError;

/// Result type for proxy operations
pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

/// Main error type for mcprouter-proxy
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    /// Backend transport error, including errors the backend itself reported
    #[error("Backend error: {0}")]
    Client(#[from] ClientError),

    /// Invalid router configuration
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong
        message: String,
        /// Offending configuration key
        key: Option<String>,
    },

    /// No backend is configured under this key
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// No live session with this id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The inbound request failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The client's event stream is gone
    #[error("Stream error: {0}")]
    Stream(#[from] SseError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error for a specific key
    pub fn configuration_with_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Whether the backend itself reported this error
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Client(err) if err.is_upstream())
    }

    /// Message safe to show to clients
    ///
    /// Backend-reported messages pass through; everything else is reduced to
    /// a generic description without paths, commands or addresses.
    pub fn sanitize(&self) -> String {
        match self {
            Self::Client(err) => match err {
                ClientError::Upstream(upstream) => upstream.message.clone(),
                ClientError::Timeout(_) => "Backend request timed out".to_string(),
                ClientError::ClosedNoResponse => "Backend closed without responding".to_string(),
                ClientError::InvalidConfiguration(_) => "Backend is misconfigured".to_string(),
                ClientError::MalformedMessage(_) | ClientError::MalformedResult(_) => {
                    "Backend returned a malformed message".to_string()
                }
                ClientError::Spawn(_) => "Backend failed to start".to_string(),
                ClientError::Http {
                    status: Some(code), ..
                } => format!("Backend HTTP error {code}"),
                _ => "Backend request failed".to_string(),
            },
            Self::Configuration { .. } => "Configuration error".to_string(),
            Self::ServerNotFound(key) => format!("Server not found: {key}"),
            Self::SessionNotFound(_) => "Session not found".to_string(),
            Self::InvalidRequest(message) => message.clone(),
            Self::Stream(_) => "Stream closed".to_string(),
            Self::Serialization(_) => "Data serialization error".to_string(),
            Self::Io(_) => "IO error occurred".to_string(),
        }
    }
}

impl From<config::ConfigError> for ProxyError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

/// Convert proxy errors to JSON-RPC error objects for client responses
impl From<ProxyError> for JsonRpcError {
    fn from(err: ProxyError) -> Self {
        match err {
            // Keep the backend's code, message and data.
            ProxyError::Client(ClientError::Upstream(upstream)) => upstream,
            ProxyError::InvalidRequest(reason) => JsonRpcError::invalid_request(reason),
            ProxyError::SessionNotFound(_) => JsonRpcError::invalid_request("Session not found"),
            ProxyError::ServerNotFound(ref key) => {
                JsonRpcError::invalid_params(&format!("unknown server {key}"))
            }
            ProxyError::Serialization(_) => JsonRpcError::parse_error(),
            other => JsonRpcError::internal_error(&other.sanitize()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_upstream_error_keeps_code() {
        let upstream = JsonRpcError::with_data(-32042, "quota", serde_json::json!({"left": 0}));
        let err = ProxyError::from(ClientError::Upstream(upstream.clone()));
        assert!(err.is_upstream());
        assert_eq!(JsonRpcError::from(err), upstream);
    }

    #[test]
    fn test_transport_error_becomes_internal() {
        let err = ProxyError::from(ClientError::Timeout(Duration::from_secs(30)));
        assert!(!err.is_upstream());
        let rpc = JsonRpcError::from(err);
        assert_eq!(rpc.code, -32603);
        assert!(rpc.message.contains("timed out"));
    }

    #[test]
    fn test_sanitize_hides_details() {
        let err = ProxyError::from(ClientError::Spawn(std::io::Error::other(
            "/opt/secret/bin/server: not found",
        )));
        assert_eq!(err.sanitize(), "Backend failed to start");

        let err = ProxyError::configuration_with_key("bad bind 10.0.0.1", "server.bind");
        assert_eq!(err.sanitize(), "Configuration error");
    }

    #[test]
    fn test_session_not_found_is_invalid_request() {
        let rpc = JsonRpcError::from(ProxyError::SessionNotFound("abc".into()));
        assert_eq!(rpc.code, -32600);
    }
}
