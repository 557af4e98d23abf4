//! # mcprouter-protocol
//!
//! JSON-RPC 2.0 envelope and the subset of Model Context Protocol payloads the
//! router forwards to backend tool servers.
//!
//! This crate is pure data: it builds requests, parses responses, and decodes
//! result payloads into typed shapes. It performs no I/O.
//!
//! ## Usage
//!
//! ```rust
//! use mcprouter_protocol::{Request, RequestId, Response, methods};
//! use mcprouter_protocol::types::ListToolsResult;
//!
//! let request = Request::new(methods::LIST_TOOLS, None, RequestId::Number(1));
//! assert!(!request.is_notification());
//!
//! let raw = br#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#;
//! let response = Response::from_slice(raw).unwrap();
//! let tools: ListToolsResult = response.unmarshal_result().unwrap();
//! assert!(tools.tools.is_empty());
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod error;
pub mod jsonrpc;
pub mod methods;
pub mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use jsonrpc::{
    JSONRPC_VERSION, JsonRpcError, JsonRpcErrorCode, JsonRpcVersion, Request, RequestId, Response,
};

/// MCP protocol revision announced by the router when it initializes a backend
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";
