//! The transport capability shared by every backend kind
//!
//! Implementors provide raw message exchange. The structured MCP calls
//! (`initialize`, `tools/list`, `tools/call`) are provided on top of it and
//! behave identically for every transport.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use mcprouter_protocol::types::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, ListToolsResult,
};
use mcprouter_protocol::{Request, RequestId, Response, methods};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

/// Observer invoked with the raw bytes of every id-less message a backend sends
pub type NotificationHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A connection to one backend MCP server
#[async_trait]
pub trait Client: Send + Sync {
    /// The pending fatal error, if one occurred
    ///
    /// Non-consuming: every call returns the same error once it is set.
    fn error(&self) -> Option<ClientError>;

    /// Release the backend
    ///
    /// Idempotent. Every pending call resolves with
    /// [`ClientError::ClosedNoResponse`] once this starts.
    async fn close(&self) -> ClientResult<()>;

    /// Register an observer for id-less messages from the backend
    fn on_notification(&self, handler: NotificationHandler);

    /// Send one serialized JSON-RPC message
    ///
    /// Returns `None` for notifications and the raw response bytes otherwise.
    async fn send_message(&self, message: &[u8]) -> ClientResult<Option<Bytes>>;

    /// Allocate a request id unique for this connection
    fn next_request_id(&self) -> RequestId;

    /// Send a typed request and decode the response envelope
    async fn forward_message(&self, request: &Request) -> ClientResult<Option<Response>> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| ClientError::malformed_message(e.to_string()))?;
        let Some(raw) = self.send_message(&payload).await? else {
            return Ok(None);
        };
        Ok(Some(Response::from_slice(&raw)?))
    }

    /// Perform the `initialize` handshake
    async fn initialize(&self, params: InitializeParams) -> ClientResult<InitializeResult> {
        let params = to_params(&params)?;
        let request = Request::new(methods::INITIALIZE, Some(params), self.next_request_id());
        call(self, request).await
    }

    /// Send `notifications/initialized`
    async fn notifications_initialized(&self) -> ClientResult<()> {
        let request = Request::notification(methods::INITIALIZED_NOTIFICATION, None);
        self.forward_message(&request).await?;
        Ok(())
    }

    /// List the backend's tools
    async fn list_tools(&self) -> ClientResult<ListToolsResult> {
        let request = Request::new(methods::LIST_TOOLS, None, self.next_request_id());
        call(self, request).await
    }

    /// Invoke a tool on the backend
    async fn call_tool(&self, params: CallToolParams) -> ClientResult<CallToolResult> {
        let params = to_params(&params)?;
        let request = Request::new(methods::CALL_TOOL, Some(params), self.next_request_id());
        call(self, request).await
    }
}

fn to_params<T: serde::Serialize>(params: &T) -> ClientResult<Value> {
    serde_json::to_value(params).map_err(|e| ClientError::malformed_message(e.to_string()))
}

/// Send `request`, then unwrap the response into `T` or an upstream error
async fn call<C, T>(client: &C, request: Request) -> ClientResult<T>
where
    C: Client + ?Sized,
    T: DeserializeOwned,
{
    let response = client
        .forward_message(&request)
        .await?
        .ok_or(ClientError::ClosedNoResponse)?;

    if response.id != request.id {
        warn!(
            method = %request.method,
            expected = ?request.id,
            received = ?response.id,
            "response id does not match request id"
        );
    }

    if let Some(error) = &response.error {
        debug!(method = %request.method, code = error.code, "backend returned error");
        return Err(ClientError::Upstream(error.clone()));
    }

    Ok(response.unmarshal_result()?)
}
