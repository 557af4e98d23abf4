//! Transport selection
//!
//! [`new_client`] turns a [`ServerConfig`] into a running transport. The
//! result is an [`AnyClient`], which forwards every [`Client`] call to the
//! concrete variant.

use async_trait::async_trait;
use bytes::Bytes;
use mcprouter_protocol::RequestId;
use tracing::debug;

use crate::client::{Client, NotificationHandler};
use crate::config::{BackendKind, ServerConfig};
use crate::error::{ClientError, ClientResult};
use crate::rest::RestClient;
use crate::stdio::{StdioClient, StdioOptions};

/// Type-erased transport
#[derive(Debug)]
pub enum AnyClient {
    /// Local process (stdin/stdout)
    Stdio(StdioClient),
    /// Remote server (HTTP POST)
    Rest(RestClient),
}

/// Dispatch a method call to the concrete transport
macro_rules! dispatch_client {
    ($client:expr, $method:ident($($args:expr),*)) => {
        match $client {
            AnyClient::Stdio(c) => c.$method($($args),*),
            AnyClient::Rest(c) => c.$method($($args),*),
        }
    };
    ($client:expr, $method:ident($($args:expr),*).await) => {
        match $client {
            AnyClient::Stdio(c) => c.$method($($args),*).await,
            AnyClient::Rest(c) => c.$method($($args),*).await,
        }
    };
}

impl AnyClient {
    /// Which transport this is
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Stdio(_) => BackendKind::Stdio,
            Self::Rest(_) => BackendKind::Remote,
        }
    }

    /// Descriptor the transport was created from
    pub fn server_config(&self) -> &ServerConfig {
        dispatch_client!(self, server_config())
    }
}

#[async_trait]
impl Client for AnyClient {
    fn error(&self) -> Option<ClientError> {
        dispatch_client!(self, error())
    }

    async fn close(&self) -> ClientResult<()> {
        dispatch_client!(self, close().await)
    }

    fn on_notification(&self, handler: NotificationHandler) {
        dispatch_client!(self, on_notification(handler));
    }

    async fn send_message(&self, message: &[u8]) -> ClientResult<Option<Bytes>> {
        dispatch_client!(self, send_message(message).await)
    }

    fn next_request_id(&self) -> RequestId {
        dispatch_client!(self, next_request_id())
    }
}

impl From<StdioClient> for AnyClient {
    fn from(client: StdioClient) -> Self {
        Self::Stdio(client)
    }
}

impl From<RestClient> for AnyClient {
    fn from(client: RestClient) -> Self {
        Self::Rest(client)
    }
}

/// Create and start the transport a descriptor selects, with default timeouts
///
/// # Errors
///
/// Returns [`ClientError::InvalidConfiguration`] when the descriptor names no
/// usable transport; start-up failures of the chosen transport propagate.
pub async fn new_client(config: &ServerConfig) -> ClientResult<AnyClient> {
    new_client_with_options(config, StdioOptions::default()).await
}

/// Create and start the transport a descriptor selects
///
/// `options.request_timeout` also bounds remote requests.
///
/// # Errors
///
/// See [`new_client`].
pub async fn new_client_with_options(
    config: &ServerConfig,
    options: StdioOptions,
) -> ClientResult<AnyClient> {
    let kind = config.backend_kind()?;
    debug!(server = %config.display_name(), transport = kind.as_str(), "creating mcp client");
    match kind {
        BackendKind::Stdio => Ok(StdioClient::spawn_with_options(config.clone(), options)
            .await?
            .into()),
        BackendKind::Remote => {
            Ok(RestClient::with_timeout(config.clone(), options.request_timeout)?.into())
        }
    }
}
