//! # mcprouter-proxy
//!
//! HTTP front end that routes MCP clients to backend MCP servers.
//!
//! - [`server`] exposes the streamable `/mcp/{server_key}` endpoint and the
//!   one-shot `/v1` tool API on axum
//! - [`registry`] keeps sessions and their backend transports
//! - [`sse`] writes bracketed server-sent event responses
//! - [`proxy_info`] records one telemetry entry per proxied call
//! - [`config`] loads the router configuration with environment overrides
//!
//! ```no_run
//! use mcprouter_proxy::config::RouterConfig;
//! use mcprouter_proxy::server::{AppState, router};
//!
//! # async fn run() -> mcprouter_proxy::ProxyResult<()> {
//! let config = RouterConfig::from_file("mcprouter.toml")?;
//! config.validate()?;
//! let listener = tokio::net::TcpListener::bind(config.bind_addr()?).await?;
//! axum::serve(listener, router(AppState::from_config(&config))).await?;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod proxy_info;
pub mod registry;
pub mod resolver;
pub mod server;
pub mod sse;

pub use config::RouterConfig;
pub use error::{ProxyError, ProxyResult};
pub use proxy_info::{AuditSink, ProxyInfo, ServerLog, TracingAuditSink};
pub use registry::{Session, SessionRegistry};
pub use resolver::{ServerResolver, StaticResolver};
pub use server::{AppState, router};
pub use sse::{SseError, SseEvent, SseWriter};
