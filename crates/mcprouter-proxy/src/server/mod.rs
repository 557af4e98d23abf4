//! HTTP surface
//!
//! ```text
//! GET    /health               liveness and store sizes
//! POST   /v1/list-tools        one-shot tools/list against a backend
//! POST   /v1/call-tool         one-shot tools/call against a backend
//! POST   /mcp/{server_key}     MCP endpoint, JSON or event-stream responses
//! DELETE /mcp/{server_key}     end the session named by Mcp-Session-Id
//! ```

pub mod api;
pub mod mcp;
mod state;

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the router for `state`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/list-tools", post(api::list_tools))
        .route("/v1/call-tool", post(api::call_tool))
        .route(
            "/mcp/{server_key}",
            post(mcp::handle_post).delete(mcp::handle_delete),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.registry.session_count(),
        "clients": state.registry.client_count(),
    }))
}
