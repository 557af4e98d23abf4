//! One-shot tool API
//!
//! Each call starts a fresh backend, handshakes, performs exactly one MCP
//! call and closes the backend again. Answers use the envelope
//! `{"code": 0, "message": "ok", "data": ...}`.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use mcprouter_client::{Client, ClientError};
use mcprouter_protocol::methods;
use mcprouter_protocol::types::CallToolParams;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use super::state::{AppState, close_quietly, to_value};
use crate::error::{ProxyError, ProxyResult};
use crate::proxy_info::ProxyInfo;

const REQUEST_FROM: &str = "api";

/// Body of `POST /v1/list-tools`
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsRequest {
    /// Backend key
    #[serde(default)]
    pub server: String,
}

/// Body of `POST /v1/call-tool`
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolRequest {
    /// Backend key
    #[serde(default)]
    pub server: String,
    /// Tool name
    #[serde(default)]
    pub name: String,
    /// Tool arguments; required, may be empty
    #[serde(default)]
    pub arguments: Option<Map<String, Value>>,
}

/// Response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// `0` on success, `-1` on failure
    pub code: i32,
    /// `"ok"` or a client-safe error description
    pub message: String,
    /// Call result; `null` on failure
    pub data: Value,
}

impl ApiResponse {
    /// Successful envelope
    pub fn ok(data: Value) -> Self {
        Self {
            code: 0,
            message: "ok".to_string(),
            data,
        }
    }

    /// Failure envelope
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            code: -1,
            message: message.into(),
            data: Value::Null,
        }
    }
}

/// Error answered with a failure envelope
#[derive(Debug)]
pub struct ApiError(pub ProxyError);

impl ApiError {
    /// HTTP status for the wrapped error
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::ServerNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::Client(ClientError::InvalidConfiguration(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::Client(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, "api call failed");
        }
        (status, Json(ApiResponse::err(self.0.sanitize()))).into_response()
    }
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> ProxyResult<T> {
    body.map(|Json(body)| body)
        .map_err(|rejection| ProxyError::invalid_request(rejection.body_text()))
}

fn required<'a>(field: &str, value: &'a str) -> ProxyResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ProxyError::invalid_request(format!("{field} is required")));
    }
    Ok(value)
}

/// `POST /v1/list-tools`
pub async fn list_tools(
    State(state): State<AppState>,
    body: Result<Json<ListToolsRequest>, JsonRejection>,
) -> Result<Json<ApiResponse>, ApiError> {
    let body = parse_body(body)?;
    let server_key = required("server", &body.server)?;

    let (client, mut info) = state.connect(server_key).await?;
    tag(&mut info, server_key);
    info.begin_request(methods::LIST_TOOLS, None, None);

    let result = client.list_tools().await;
    close_quietly(&client).await;
    finish(&state, info, result.map_err(ProxyError::from).and_then(|r| to_value(&r))).await
}

/// `POST /v1/call-tool`
pub async fn call_tool(
    State(state): State<AppState>,
    body: Result<Json<CallToolRequest>, JsonRejection>,
) -> Result<Json<ApiResponse>, ApiError> {
    let body = parse_body(body)?;
    let server_key = required("server", &body.server)?;
    let name = required("name", &body.name)?;
    let arguments = body
        .arguments
        .clone()
        .ok_or_else(|| ProxyError::invalid_request("arguments is required"))?;

    let (client, mut info) = state.connect(server_key).await?;
    tag(&mut info, server_key);
    let params = CallToolParams::new(name, Some(arguments));
    info.begin_request(methods::CALL_TOOL, Some(to_value(&params)?), None);

    let result = client.call_tool(params).await;
    close_quietly(&client).await;
    finish(&state, info, result.map_err(ProxyError::from).and_then(|r| to_value(&r))).await
}

fn tag(info: &mut ProxyInfo, server_key: &str) {
    info.request_from = REQUEST_FROM.to_string();
    info.session_id = ProxyInfo::session_id_for(server_key);
}

async fn finish(
    state: &AppState,
    mut info: ProxyInfo,
    result: ProxyResult<Value>,
) -> Result<Json<ApiResponse>, ApiError> {
    match result {
        Ok(value) => {
            info.record_result(value.clone());
            state.record(&info).await;
            Ok(Json(ApiResponse::ok(value)))
        }
        Err(e) => {
            info.record_error(&e);
            state.record(&info).await;
            Err(ApiError(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcprouter_protocol::JsonRpcError;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ProxyError::invalid_request("server is required"), StatusCode::BAD_REQUEST),
            (ProxyError::ServerNotFound("x".into()), StatusCode::NOT_FOUND),
            (
                ProxyError::from(ClientError::Timeout(Duration::from_secs(30))),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ProxyError::from(ClientError::Upstream(JsonRpcError::new(-32602, "bad"))),
                StatusCode::BAD_GATEWAY,
            ),
            (ProxyError::configuration("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[test]
    fn test_required_trims() {
        assert_eq!(required("server", " weather ").unwrap(), "weather");
        assert!(matches!(
            required("server", "  "),
            Err(ProxyError::InvalidRequest(ref m)) if m == "server is required"
        ));
    }

    #[test]
    fn test_envelopes() {
        let ok = serde_json::to_value(ApiResponse::ok(serde_json::json!({"tools": []}))).unwrap();
        assert_eq!(ok, serde_json::json!({"code": 0, "message": "ok", "data": {"tools": []}}));
        let err = serde_json::to_value(ApiResponse::err("Server not found: x")).unwrap();
        assert_eq!(
            err,
            serde_json::json!({"code": -1, "message": "Server not found: x", "data": null})
        );
    }
}
