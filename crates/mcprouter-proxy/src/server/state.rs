//! Shared handler state

use std::sync::Arc;

use mcprouter_client::{AnyClient, Client, StdioOptions, new_client_with_options};
use mcprouter_protocol::types::{Implementation, InitializeParams};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{AppSection, RouterConfig};
use crate::error::{ProxyError, ProxyResult};
use crate::proxy_info::{AuditSink, ProxyInfo, TracingAuditSink};
use crate::registry::SessionRegistry;
use crate::resolver::{ServerResolver, StaticResolver};

/// Everything a request handler needs; cheap to clone
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live sessions and their transports
    pub registry: Arc<SessionRegistry>,
    /// Backend lookup
    pub resolver: Arc<dyn ServerResolver>,
    /// Destination for saved call records
    pub audit: Arc<dyn AuditSink>,
    /// Which call records are saved
    pub app: AppSection,
    /// Transport tunables for new backends
    pub stdio_options: StdioOptions,
    /// Identity the router announces to backends
    pub client_info: Implementation,
}

impl AppState {
    /// State with the given resolver and defaults for everything else
    pub fn new(resolver: Arc<dyn ServerResolver>) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            resolver,
            audit: Arc::new(TracingAuditSink),
            app: AppSection::default(),
            stdio_options: StdioOptions::default(),
            client_info: Implementation::new("mcprouter", env!("CARGO_PKG_VERSION")),
        }
    }

    /// State serving the backends of a configuration
    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            app: config.app.clone(),
            stdio_options: config.stdio_options(),
            ..Self::new(Arc::new(StaticResolver::from_config(config)))
        }
    }

    /// Replace the audit sink
    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Replace the transport tunables
    #[must_use]
    pub fn with_stdio_options(mut self, options: StdioOptions) -> Self {
        self.stdio_options = options;
        self
    }

    /// Log a finished call record and hand it to the audit sink when configured
    pub async fn record(&self, info: &ProxyInfo) {
        if let Ok(json) = serde_json::to_string(info) {
            debug!(proxy_info = %json, "call finished");
        }
        if !self.app.should_save(&info.request_method) {
            return;
        }
        match self.audit.save(&info.to_server_log()).await {
            Ok(()) => debug!(request_id = ?info.request_id, "save server log ok"),
            Err(e) => warn!(error = %e, "save server log failed"),
        }
    }

    /// Resolve a backend, start it, and complete the MCP handshake
    ///
    /// The returned record carries the backend identity and versions.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ServerNotFound`] for an unknown key; transport and
    /// handshake failures are wrapped in [`ProxyError::Client`]. A client that
    /// fails the handshake is closed before returning.
    pub async fn connect(&self, server_key: &str) -> ProxyResult<(AnyClient, ProxyInfo)> {
        let server = self
            .resolver
            .resolve(server_key)
            .ok_or_else(|| ProxyError::ServerNotFound(server_key.to_string()))?;

        let mut info = ProxyInfo::for_server(&server);
        info.record_client(&self.client_info);

        let client = new_client_with_options(&server, self.stdio_options.clone()).await?;
        let handshake = async {
            let init = client
                .initialize(InitializeParams::new(self.client_info.clone()))
                .await?;
            client.notifications_initialized().await?;
            Ok::<_, ProxyError>(init)
        }
        .await;

        match handshake {
            Ok(init) => {
                info.protocol_version = init.protocol_version.clone();
                info.record_server(&init.server_info);
                Ok((client, info))
            }
            Err(e) => {
                close_quietly(&client).await;
                Err(e)
            }
        }
    }
}

/// Close a transport this handler owns exclusively, logging failures
pub(crate) async fn close_quietly(client: &dyn Client) {
    if let Err(e) = client.close().await {
        debug!(error = %e, "error while closing client");
    }
}

/// Serialize a result for the record and the response body
pub(crate) fn to_value<T: serde::Serialize>(value: &T) -> ProxyResult<Value> {
    Ok(serde_json::to_value(value)?)
}
