//! # mcprouter-client
//!
//! Connections from the router to backend MCP servers.
//!
//! Two transports implement the same [`Client`] capability:
//!
//! - [`StdioClient`] starts the backend command under the platform shell and
//!   exchanges newline-delimited JSON-RPC over stdin/stdout.
//! - [`RestClient`] POSTs each message to an `http(s)` endpoint.
//!
//! [`new_client`] picks one from a [`ServerConfig`]: an `http(s)` URL selects
//! the remote transport and wins over a command; otherwise the command selects
//! the process transport.
//!
//! ```no_run
//! use mcprouter_client::{Client, ServerConfig, new_client};
//! use mcprouter_protocol::types::{Implementation, InitializeParams};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = new_client(&ServerConfig::stdio("npx -y @acme/weather-mcp")).await?;
//! client
//!     .initialize(InitializeParams::new(Implementation::new("mcprouter", "0.3.0")))
//!     .await?;
//! client.notifications_initialized().await?;
//! let tools = client.list_tools().await?;
//! println!("{} tools", tools.tools.len());
//! client.close().await?;
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

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod rest;
pub mod stdio;

pub use backend::{AnyClient, new_client, new_client_with_options};
pub use client::{Client, NotificationHandler};
pub use config::{BackendKind, ServerConfig, command_hash};
pub use error::{ClientError, ClientResult};
pub use rest::RestClient;
pub use stdio::{ClientState, StdioClient, StdioOptions};
