//! Remote transport
//!
//! Each message is POSTed to the backend URL as a JSON body. The response
//! body is the JSON-RPC response; streamable HTTP servers that answer with an
//! event stream are unwrapped to the first message carrying an id.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mcprouter_protocol::{JSONRPC_VERSION, RequestId};
use parking_lot::RwLock;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::client::{Client, NotificationHandler};
use crate::config::ServerConfig;
use crate::error::{ClientError, ClientResult};
use crate::stdio::DEFAULT_REQUEST_TIMEOUT;

/// JSON-RPC over HTTP POST
pub struct RestClient {
    config: ServerConfig,
    http: reqwest::Client,
    request_timeout: Duration,
    // Kept for interface parity; HTTP responses never carry notifications.
    observers: RwLock<Vec<NotificationHandler>>,
    closed: AtomicBool,
    next_id: AtomicI64,
}

impl RestClient {
    /// Create a remote transport with the default request ceiling
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfiguration`] if `server_url` is not an
    /// `http(s)` URL, or [`ClientError::Http`] if the HTTP client cannot be built.
    pub fn new(config: ServerConfig) -> ClientResult<Self> {
        Self::with_timeout(config, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a remote transport with a custom request ceiling
    ///
    /// # Errors
    ///
    /// See [`RestClient::new`].
    pub fn with_timeout(config: ServerConfig, request_timeout: Duration) -> ClientResult<Self> {
        let url = config.server_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ClientError::invalid_configuration(format!(
                "unsupported server_url: {url:?}"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| ClientError::http(format!("failed to create HTTP client: {e}")))?;

        debug!(url = %config.server_url, "created remote mcp client");

        Ok(Self {
            config,
            http,
            request_timeout,
            observers: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
            next_id: AtomicI64::new(0),
        })
    }

    /// Descriptor this transport was created from
    pub fn server_config(&self) -> &ServerConfig {
        &self.config
    }

    fn map_send_error(&self, err: &reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout(self.request_timeout)
        } else {
            ClientError::Http {
                message: format!("request to {} failed: {err}", self.config.server_url),
                status: err.status().map(|s| s.as_u16()),
            }
        }
    }
}

#[async_trait]
impl Client for RestClient {
    fn error(&self) -> Option<ClientError> {
        None
    }

    async fn close(&self) -> ClientResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(url = %self.config.server_url, "closed remote mcp client");
        }
        Ok(())
    }

    fn on_notification(&self, handler: NotificationHandler) {
        self.observers.write().push(handler);
    }

    async fn send_message(&self, message: &[u8]) -> ClientResult<Option<Bytes>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ClosedNoResponse);
        }

        let value: Value = serde_json::from_slice(message)
            .map_err(|e| ClientError::malformed_message(format!("invalid request message: {e}")))?;
        if value.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(ClientError::malformed_message(
                "invalid request message: jsonrpc must be \"2.0\"",
            ));
        }
        let is_notification = value.get("id").is_none();

        let response = self
            .http
            .post(&self.config.server_url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(message.to_vec())
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %self.config.server_url, %status, "remote mcp server returned error status");
            return Err(ClientError::Http {
                message: format!("unexpected status {status}: {body}"),
                status: Some(status.as_u16()),
            });
        }

        if is_notification {
            trace!(url = %self.config.server_url, "notification accepted");
            return Ok(None);
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        let body = response.bytes().await.map_err(|e| self.map_send_error(&e))?;

        if is_event_stream {
            return extract_event_stream_message(&body)
                .map(Some)
                .ok_or_else(|| ClientError::malformed_message("event stream carried no response"));
        }
        Ok(Some(body))
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for RestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient")
            .field("url", &self.config.server_url)
            .field("request_timeout", &self.request_timeout)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// First `data` payload in an event stream body that is a JSON-RPC response
fn extract_event_stream_message(body: &[u8]) -> Option<Bytes> {
    let text = String::from_utf8_lossy(body);
    let mut data = String::new();

    for line in text.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            if !data.is_empty() {
                let is_response = serde_json::from_str::<Value>(&data)
                    .ok()
                    .is_some_and(|v| v.get("id").is_some());
                if is_response {
                    return Some(Bytes::from(data));
                }
                data.clear();
            }
            continue;
        }
        if let Some(payload) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(payload.strip_prefix(' ').unwrap_or(payload));
        }
    }
    None
}
