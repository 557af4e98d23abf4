//! Streamable MCP endpoint
//!
//! `initialize` opens a session bound to the path's backend and returns its
//! id in `Mcp-Session-Id`; every later message must carry that header. With
//! `Accept: text/event-stream` the answer is written as a
//! `started`, `jsonrpc`, `completed` event bracket instead of one JSON body.
//! Notifications the backend sends while a streamed exchange is open are
//! written into that bracket ahead of the response.

use std::sync::{Arc, Weak};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::ACCEPT;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use mcprouter_client::{Client, ClientError, new_client_with_options};
use mcprouter_protocol::types::{InitializeParams, InitializeResult};
use mcprouter_protocol::{JsonRpcError, Request, RequestId, methods};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::state::AppState;
use crate::error::{ProxyError, ProxyResult};
use crate::proxy_info::ProxyInfo;
use crate::registry::Session;
use crate::sse::SseWriter;

/// Session header name
pub const SESSION_HEADER: &str = "mcp-session-id";

const EVENT_STREAM_MIME: &str = "text/event-stream";
const REQUEST_FROM: &str = "mcp";

type RpcResponse = mcprouter_protocol::Response;

/// `POST /mcp/{server_key}`
pub async fn handle_post(
    State(state): State<AppState>,
    Path(server_key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match Request::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "rejecting unparseable message");
            return rpc_reply(
                StatusCode::BAD_REQUEST,
                RpcResponse::error(None, JsonRpcError::parse_error()),
            );
        }
    };
    let stream = accepts_event_stream(&headers);

    if request.method == methods::INITIALIZE {
        return initialize(state, server_key, request, stream).await;
    }

    let Some(session_id) = session_header(&headers) else {
        return rpc_failure(
            StatusCode::BAD_REQUEST,
            request.id,
            ProxyError::invalid_request("missing Mcp-Session-Id header"),
        );
    };
    let client = match bound_client(&state, &server_key, &session_id) {
        Ok(client) => client,
        Err(e) => return rpc_failure(StatusCode::NOT_FOUND, request.id, e),
    };
    state.registry.touch_session(&session_id);

    let info = begin_info(&state, &server_key, &session_id, &request);

    if request.is_notification() {
        return match client.forward_message(&request).await {
            Ok(_) => StatusCode::ACCEPTED.into_response(),
            Err(e) => {
                warn!(session_id = %session_id, method = %request.method, error = %e, "notification not delivered");
                StatusCode::BAD_GATEWAY.into_response()
            }
        };
    }

    if stream {
        let (writer, body) = SseWriter::channel();
        tokio::spawn(async move {
            if writer.stream_started().await.is_err() {
                debug!(session_id = %session_id, "client left before stream started");
            }
            state.registry.attach_stream(session_id.clone(), writer.clone());
            let result = exchange(&state, client.as_ref(), &request, info).await;
            state.registry.detach_stream(&session_id, &writer);
            evict_if_terminal(&state, &session_id, &result).await;
            let (_, response) = into_reply(request.id.clone(), result);
            if writer.stream_completed(Some(&response)).await.is_err() {
                debug!(session_id = %session_id, "client left before stream completed");
            }
        });
        return body.into_response();
    }

    let result = exchange(&state, client.as_ref(), &request, info).await;
    evict_if_terminal(&state, &session_id, &result).await;
    let (status, response) = into_reply(request.id.clone(), result);
    rpc_reply(status, response)
}

/// `DELETE /mcp/{server_key}`
pub async fn handle_delete(
    State(state): State<AppState>,
    Path(server_key): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    let Some(session_id) = session_header(&headers) else {
        return StatusCode::BAD_REQUEST;
    };
    match state.registry.get_session(&session_id) {
        Some(session) if session.server_key == server_key => {
            state.registry.evict(&session_id).await;
            StatusCode::NO_CONTENT
        }
        _ => StatusCode::NOT_FOUND,
    }
}

async fn initialize(state: AppState, server_key: String, request: Request, stream: bool) -> Response {
    if request.is_notification() {
        return rpc_failure(
            StatusCode::BAD_REQUEST,
            None,
            ProxyError::invalid_request("initialize must carry an id"),
        );
    }
    let Some(server) = state.resolver.resolve(&server_key) else {
        return rpc_failure(
            StatusCode::NOT_FOUND,
            request.id,
            ProxyError::ServerNotFound(server_key),
        );
    };

    let client: Arc<dyn Client> =
        match new_client_with_options(&server, state.stdio_options.clone()).await {
            Ok(client) => Arc::new(client),
            Err(e) => {
                return rpc_failure(StatusCode::BAD_GATEWAY, request.id, ProxyError::from(e));
            }
        };

    let session_id = Uuid::new_v4().to_string();
    let mut session = Session::new(session_id.clone(), server_key.clone());
    let params = request
        .params
        .clone()
        .and_then(|p| serde_json::from_value::<InitializeParams>(p).ok());
    if let Some(params) = &params {
        session.client_name.clone_from(&params.client_info.name);
        session.client_version.clone_from(&params.client_info.version);
        session.protocol_version.clone_from(&params.protocol_version);
    }
    state.registry.store_session(session_id.clone(), session);
    state.registry.store_client(session_id.clone(), Arc::clone(&client));
    forward_notifications(&state, client.as_ref(), &session_id);

    let mut info = begin_info(&state, &server_key, &session_id, &request);
    if let Some(params) = &params {
        info.record_client(&params.client_info);
    }

    let result = exchange(&state, client.as_ref(), &request, info).await;
    let accepted = matches!(&result, Ok(response) if response.error.is_none());
    if !accepted {
        state.registry.evict(&session_id).await;
    } else {
        info!(session_id = %session_id, server_key = %server_key, "session opened");
    }
    let (status, response) = into_reply(request.id.clone(), result);

    let mut reply = if stream {
        let (writer, body) = SseWriter::channel();
        if let Err(e) = writer.respond_once(&response).await {
            debug!(error = %e, "initialize stream closed early");
        }
        body.into_response()
    } else {
        rpc_reply(status, response)
    };
    if accepted && let Ok(value) = HeaderValue::from_str(&session_id) {
        reply
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_HEADER), value);
    }
    reply
}

/// Relay the session's backend notifications to its active event stream
///
/// Registered once per session. The observer holds the registry weakly so a
/// stored transport does not keep its own registry alive.
fn forward_notifications(state: &AppState, client: &dyn Client, session_id: &str) {
    let registry = Arc::downgrade(&state.registry);
    let session_id = session_id.to_string();
    client.on_notification(Arc::new(move |line: &[u8]| {
        if let Some(registry) = Weak::upgrade(&registry) {
            registry.forward_notification(&session_id, line);
        }
    }));
}

/// Forward one request and record the outcome
///
/// Backend-reported errors stay inside the returned envelope; only transport
/// failures are `Err`.
async fn exchange(
    state: &AppState,
    client: &dyn Client,
    request: &Request,
    mut info: ProxyInfo,
) -> ProxyResult<RpcResponse> {
    let result = match client.forward_message(request).await {
        Ok(Some(response)) => Ok(response),
        Ok(None) => Err(ProxyError::from(ClientError::ClosedNoResponse)),
        Err(e) => Err(ProxyError::from(e)),
    };

    match &result {
        Ok(response) => match &response.error {
            Some(error) => info.record_error(error),
            None => {
                if request.method == methods::INITIALIZE
                    && let Some(init) = response
                        .result
                        .clone()
                        .and_then(|r| serde_json::from_value::<InitializeResult>(r).ok())
                {
                    info.protocol_version = init.protocol_version.clone();
                    info.record_server(&init.server_info);
                }
                info.record_result(response.result.clone().unwrap_or(Value::Null));
            }
        },
        Err(e) => info.record_error(e),
    }
    state.record(&info).await;
    result
}

fn into_reply(id: Option<RequestId>, result: ProxyResult<RpcResponse>) -> (StatusCode, RpcResponse) {
    match result {
        Ok(response) => (StatusCode::OK, response),
        Err(e) => {
            let status = match &e {
                ProxyError::Client(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warn!(error = %e, "forwarding failed");
            (status, RpcResponse::error(id, JsonRpcError::from(e)))
        }
    }
}

/// Drop a session whose transport can no longer answer
async fn evict_if_terminal(state: &AppState, session_id: &str, result: &ProxyResult<RpcResponse>) {
    let terminal = matches!(
        result,
        Err(ProxyError::Client(
            ClientError::Timeout(_)
                | ClientError::ClosedNoResponse
                | ClientError::StreamFailure(_)
                | ClientError::ProcessExit(_)
                | ClientError::KilledAfterTimeout
                | ClientError::StdinCloseTimeout
        ))
    );
    if terminal {
        state.registry.evict(session_id).await;
    }
}

fn bound_client(state: &AppState, server_key: &str, session_id: &str) -> ProxyResult<Arc<dyn Client>> {
    let bound = state
        .registry
        .get_session(session_id)
        .is_some_and(|s| s.server_key == server_key);
    if !bound {
        return Err(ProxyError::SessionNotFound(session_id.to_string()));
    }
    state
        .registry
        .get_client(session_id)
        .ok_or_else(|| ProxyError::SessionNotFound(session_id.to_string()))
}

fn begin_info(state: &AppState, server_key: &str, session_id: &str, request: &Request) -> ProxyInfo {
    let mut info = match state.resolver.resolve(server_key) {
        Some(server) => ProxyInfo::for_server(&server),
        None => {
            let mut info = ProxyInfo::for_server(&Default::default());
            info.server_key = server_key.to_string();
            info
        }
    };
    if let Some(session) = state.registry.get_session(session_id) {
        info.client_name = session.client_name;
        info.client_version = session.client_version;
        info.connection_time = session.created_at;
    }
    info.request_from = REQUEST_FROM.to_string();
    info.session_id = session_id.to_string();
    info.begin_request(&request.method, request.params.clone(), request.id.clone());
    info
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(EVENT_STREAM_MIME))
}

fn rpc_reply(status: StatusCode, response: RpcResponse) -> Response {
    (status, Json(response)).into_response()
}

fn rpc_failure(status: StatusCode, id: Option<RequestId>, error: ProxyError) -> Response {
    rpc_reply(status, RpcResponse::error(id, JsonRpcError::from(error)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_accepts_event_stream() {
        assert!(accepts_event_stream(&headers(&[(
            "accept",
            "application/json, text/event-stream"
        )])));
        assert!(accepts_event_stream(&headers(&[
            ("accept", "application/json"),
            ("accept", "text/event-stream"),
        ])));
        assert!(!accepts_event_stream(&headers(&[("accept", "application/json")])));
        assert!(!accepts_event_stream(&HeaderMap::new()));
    }

    #[test]
    fn test_session_header() {
        assert_eq!(
            session_header(&headers(&[("mcp-session-id", " abc ")])).as_deref(),
            Some("abc")
        );
        assert_eq!(session_header(&headers(&[("mcp-session-id", "")])), None);
        assert_eq!(session_header(&HeaderMap::new()), None);
    }

    #[test]
    fn test_into_reply_keeps_upstream_envelope() {
        let upstream = RpcResponse::error(
            Some(RequestId::Number(3)),
            JsonRpcError::new(-32602, "bad arguments"),
        );
        let (status, response) = into_reply(Some(RequestId::Number(3)), Ok(upstream.clone()));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response, upstream);
    }

    #[test]
    fn test_into_reply_maps_transport_failure() {
        let (status, response) = into_reply(
            Some(RequestId::Number(4)),
            Err(ProxyError::from(ClientError::ClosedNoResponse)),
        );
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(response.id, Some(RequestId::Number(4)));
        let error = response.error.unwrap();
        assert_eq!(error.code, -32603);
    }
}
