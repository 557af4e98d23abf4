//! Backend descriptor
//!
//! A [`ServerConfig`] names one backend MCP server and how to reach it: a
//! shell command for a local process or an `http(s)` URL for a remote one.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{ClientError, ClientResult};

/// How a backend is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Local process speaking newline-delimited JSON-RPC over stdin/stdout
    Stdio,
    /// Remote server accepting JSON-RPC over HTTP POST
    Remote,
}

impl BackendKind {
    /// Short label used in logs and telemetry
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Remote => "remote",
        }
    }
}

/// Descriptor of one backend MCP server
///
/// Field names match the JSON shape used by configuration files and the
/// telemetry record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Stable identifier of this backend
    pub server_uuid: String,
    /// Display name
    pub server_name: String,
    /// Name of the configuration entry this descriptor came from
    pub server_config_name: String,
    /// Routing key clients use to address this backend
    pub server_key: String,
    /// Shell command that starts a local backend
    pub command: String,
    /// Hex SHA-256 of `command`
    pub command_hash: String,
    /// Whether several sessions may share one backend process
    ///
    /// Carried for configuration compatibility; the router never shares a
    /// process and starts one backend per session.
    pub share_process: bool,
    /// Free-form backend classification
    pub server_type: String,
    /// Endpoint of a remote backend
    pub server_url: String,
    /// JSON object injected into every request as `params._meta.auth`
    pub server_params: String,
}

impl ServerConfig {
    /// Descriptor for a local process backend
    pub fn stdio(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            command_hash: command_hash(&command),
            command,
            ..Self::default()
        }
    }

    /// Descriptor for a remote backend
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            server_url: url.into(),
            ..Self::default()
        }
    }

    /// Set the routing key
    #[must_use]
    pub fn with_server_key(mut self, key: impl Into<String>) -> Self {
        self.server_key = key.into();
        self
    }

    /// Set the injected auth parameters
    #[must_use]
    pub fn with_server_params(mut self, params: &Value) -> Self {
        self.server_params = params.to_string();
        self
    }

    /// Select the transport for this descriptor
    ///
    /// A configured URL wins and must use `http` or `https`; otherwise a
    /// non-empty command is required.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfiguration`] for a non-HTTP URL, or
    /// when neither a URL nor a command is present.
    pub fn backend_kind(&self) -> ClientResult<BackendKind> {
        let url = self.server_url.trim();
        if !url.is_empty() {
            if url.starts_with("http://") || url.starts_with("https://") {
                return Ok(BackendKind::Remote);
            }
            return Err(ClientError::invalid_configuration(format!(
                "unsupported server_url scheme: {url}"
            )));
        }
        if self.command.trim().is_empty() {
            return Err(ClientError::invalid_configuration(
                "no command or server_url configured",
            ));
        }
        Ok(BackendKind::Stdio)
    }

    /// Fill `command_hash` when it was not configured
    pub fn ensure_command_hash(&mut self) {
        if self.command_hash.is_empty() && !self.command.is_empty() {
            self.command_hash = command_hash(&self.command);
        }
    }

    /// Parsed `server_params`
    ///
    /// An empty string yields an empty object. Text that is not a JSON object
    /// is logged and treated as empty.
    pub fn server_params_object(&self) -> Map<String, Value> {
        let raw = self.server_params.trim();
        if raw.is_empty() {
            return Map::new();
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(params)) => params,
            Ok(_) => {
                warn!(server_key = %self.server_key, "server_params is not a JSON object, ignoring");
                Map::new()
            }
            Err(e) => {
                warn!(server_key = %self.server_key, error = %e, "failed to parse server_params, ignoring");
                Map::new()
            }
        }
    }

    /// Best human-readable label for logs
    pub fn display_name(&self) -> &str {
        [&self.server_name, &self.server_key, &self.command, &self.server_url]
            .into_iter()
            .find(|s| !s.is_empty())
            .map_or("unnamed", String::as_str)
    }
}

/// Hex-encoded SHA-256 of a backend command
pub fn command_hash(command: &str) -> String {
    let digest = Sha256::digest(command.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}
