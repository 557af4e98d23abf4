//! Per-call telemetry record
//!
//! One [`ProxyInfo`] describes a single proxied call: who asked, which backend
//! served it, what came back and how long it took. [`ServerLog`] is the flat
//! shape handed to an [`AuditSink`].

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mcprouter_client::{ServerConfig, command_hash};
use mcprouter_protocol::types::Implementation;
use mcprouter_protocol::{JSONRPC_VERSION, LATEST_PROTOCOL_VERSION, RequestId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::ProxyResult;

/// Telemetry for one proxied call
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyInfo {
    pub jsonrpc_version: String,
    pub protocol_version: String,
    pub connection_time: DateTime<Utc>,
    pub client_name: String,
    pub client_version: String,
    pub client_url: String,
    pub request_method: String,
    pub request_params: Option<Value>,
    pub request_id: Option<RequestId>,
    pub request_time: DateTime<Utc>,
    pub request_from: String,
    pub session_id: String,
    pub server_uuid: String,
    pub server_key: String,
    pub server_config_name: String,
    pub server_share_process: bool,
    pub server_type: String,
    pub server_url: String,
    pub server_command: String,
    pub server_command_hash: String,
    pub server_name: String,
    pub server_version: String,
    pub response_time: Option<DateTime<Utc>>,
    pub response_result: Option<Value>,
    pub response_error: String,
    /// Milliseconds from `request_time` to `response_time`
    pub cost_time: i64,
}

impl ProxyInfo {
    /// Record seeded with a backend's identity; connection and request time are now
    pub fn for_server(server: &ServerConfig) -> Self {
        let now = Utc::now();
        Self {
            jsonrpc_version: JSONRPC_VERSION.to_string(),
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            connection_time: now,
            client_name: String::new(),
            client_version: String::new(),
            client_url: String::new(),
            request_method: String::new(),
            request_params: None,
            request_id: None,
            request_time: now,
            request_from: String::new(),
            session_id: String::new(),
            server_uuid: server.server_uuid.clone(),
            server_key: server.server_key.clone(),
            server_config_name: server.server_config_name.clone(),
            server_share_process: server.share_process,
            server_type: server.server_type.clone(),
            server_url: server.server_url.clone(),
            server_command: server.command.clone(),
            server_command_hash: server.command_hash.clone(),
            server_name: server.server_name.clone(),
            server_version: String::new(),
            response_time: None,
            response_result: None,
            response_error: String::new(),
            cost_time: 0,
        }
    }

    /// Start timing a request
    pub fn begin_request(
        &mut self,
        method: impl Into<String>,
        params: Option<Value>,
        id: Option<RequestId>,
    ) {
        self.request_method = method.into();
        self.request_params = params;
        self.request_id = id;
        self.request_time = Utc::now();
    }

    /// Record the client implementation
    pub fn record_client(&mut self, client: &Implementation) {
        self.client_name.clone_from(&client.name);
        self.client_version.clone_from(&client.version);
    }

    /// Record the backend implementation reported by `initialize`
    pub fn record_server(&mut self, server: &Implementation) {
        if self.server_name.is_empty() {
            self.server_name.clone_from(&server.name);
        }
        self.server_version.clone_from(&server.version);
    }

    /// Record a successful result and stop the clock
    pub fn record_result(&mut self, result: Value) {
        self.response_result = Some(result);
        self.finish();
    }

    /// Record a failure and stop the clock
    pub fn record_error(&mut self, error: impl fmt::Display) {
        self.response_error = error.to_string();
        self.finish();
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.response_time = Some(now);
        self.cost_time = (now - self.request_time).num_milliseconds();
    }

    /// Stable session id for calls that carry no session of their own
    pub fn session_id_for(server_key: &str) -> String {
        command_hash(server_key)
    }

    /// Flat persistence shape
    pub fn to_server_log(&self) -> ServerLog {
        ServerLog {
            jsonrpc_version: self.jsonrpc_version.clone(),
            protocol_version: self.protocol_version.clone(),
            connection_time: self.connection_time,
            client_name: self.client_name.clone(),
            client_version: self.client_version.clone(),
            client_url: self.client_url.clone(),
            request_method: self.request_method.clone(),
            request_params: json_text(self.request_params.as_ref()),
            request_id: self
                .request_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            request_time: self.request_time,
            request_from: self.request_from.clone(),
            session_id: self.session_id.clone(),
            server_uuid: self.server_uuid.clone(),
            server_key: self.server_key.clone(),
            server_config_name: self.server_config_name.clone(),
            server_share_process: self.server_share_process,
            server_type: self.server_type.clone(),
            server_url: self.server_url.clone(),
            server_command: self.server_command.clone(),
            server_command_hash: self.server_command_hash.clone(),
            server_name: self.server_name.clone(),
            server_version: self.server_version.clone(),
            response_time: self.response_time,
            response_result: json_text(self.response_result.as_ref()),
            response_error: self.response_error.clone(),
            cost_time: self.cost_time,
        }
    }
}

fn json_text(value: Option<&Value>) -> String {
    value.map(Value::to_string).unwrap_or_default()
}

/// Persistence shape of a call record; JSON members are stored as text
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerLog {
    pub jsonrpc_version: String,
    pub protocol_version: String,
    pub connection_time: DateTime<Utc>,
    pub client_name: String,
    pub client_version: String,
    pub client_url: String,
    pub request_method: String,
    pub request_params: String,
    pub request_id: String,
    pub request_time: DateTime<Utc>,
    pub request_from: String,
    pub session_id: String,
    pub server_uuid: String,
    pub server_key: String,
    pub server_config_name: String,
    pub server_share_process: bool,
    pub server_type: String,
    pub server_url: String,
    pub server_command: String,
    pub server_command_hash: String,
    pub server_name: String,
    pub server_version: String,
    pub response_time: Option<DateTime<Utc>>,
    pub response_result: String,
    pub response_error: String,
    pub cost_time: i64,
}

/// Destination for saved call records
#[async_trait]
pub trait AuditSink: Send + Sync + fmt::Debug {
    /// Persist one record
    ///
    /// # Errors
    ///
    /// Implementations report storage failures; callers log them.
    async fn save(&self, log: &ServerLog) -> ProxyResult<()>;
}

/// Writes each record as one structured log event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn save(&self, log: &ServerLog) -> ProxyResult<()> {
        info!(
            target: "mcprouter::audit",
            server_key = %log.server_key,
            session_id = %log.session_id,
            request_id = %log.request_id,
            method = %log.request_method,
            request_from = %log.request_from,
            cost_time = log.cost_time,
            response_error = %log.response_error,
            "server log"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn weather() -> ServerConfig {
        let mut server = ServerConfig::stdio("npx weather").with_server_key("weather");
        server.server_uuid = "uuid-1".into();
        server.server_name = "Weather".into();
        server.share_process = true;
        server
    }

    #[test]
    fn test_for_server_seeds_identity() {
        let info = ProxyInfo::for_server(&weather());
        assert_eq!(info.jsonrpc_version, "2.0");
        assert_eq!(info.protocol_version, LATEST_PROTOCOL_VERSION);
        assert_eq!(info.server_key, "weather");
        assert_eq!(info.server_uuid, "uuid-1");
        assert_eq!(info.server_command, "npx weather");
        assert!(!info.server_command_hash.is_empty());
        assert!(info.server_share_process);
        assert!(info.response_time.is_none());
    }

    #[test]
    fn test_record_result_sets_cost_time() {
        let mut info = ProxyInfo::for_server(&weather());
        info.begin_request("tools/call", Some(json!({"name": "forecast"})), Some(RequestId::Number(2)));
        info.request_time -= chrono::Duration::milliseconds(250);
        info.record_result(json!({"content": []}));

        assert!(info.response_time.is_some());
        assert!(info.cost_time >= 250);
        assert!(info.response_error.is_empty());
    }

    #[test]
    fn test_record_error() {
        let mut info = ProxyInfo::for_server(&weather());
        info.begin_request("tools/list", None, Some(RequestId::Number(1)));
        info.record_error("timeout waiting for response after 30 seconds");
        assert_eq!(info.response_error, "timeout waiting for response after 30 seconds");
        assert!(info.response_result.is_none());
        assert!(info.cost_time >= 0);
    }

    #[test]
    fn test_session_id_is_stable_digest() {
        let a = ProxyInfo::session_id_for("weather");
        assert_eq!(a, ProxyInfo::session_id_for("weather"));
        assert_ne!(a, ProxyInfo::session_id_for("search"));
        assert_eq!(a.len(), 64);
        assert_eq!(a, command_hash("weather"));
    }

    #[test]
    fn test_to_server_log_flattens_json() {
        let mut info = ProxyInfo::for_server(&weather());
        info.record_client(&Implementation::new("desktop", "1.4"));
        info.record_server(&Implementation::new("weather-mcp", "0.9"));
        info.begin_request("tools/call", Some(json!({"name": "forecast"})), Some(RequestId::from("req-7")));
        info.record_result(json!({"content": [{"type": "text", "text": "sunny"}]}));

        let log = info.to_server_log();
        assert_eq!(log.request_id, "req-7");
        assert_eq!(log.request_params, r#"{"name":"forecast"}"#);
        assert_eq!(log.response_result, r#"{"content":[{"type":"text","text":"sunny"}]}"#);
        assert_eq!(log.client_name, "desktop");
        assert_eq!(log.server_name, "Weather");
        assert_eq!(log.server_version, "0.9");
        assert_eq!(log.cost_time, info.cost_time);
    }

    #[test]
    fn test_missing_values_flatten_to_empty_text() {
        let log = ProxyInfo::for_server(&weather()).to_server_log();
        assert_eq!(log.request_id, "");
        assert_eq!(log.request_params, "");
        assert_eq!(log.response_result, "");
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_records() {
        let log = ProxyInfo::for_server(&weather()).to_server_log();
        assert!(TracingAuditSink.save(&log).await.is_ok());
    }
}
