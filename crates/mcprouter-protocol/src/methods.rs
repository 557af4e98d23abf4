//! MCP method names used by the router

/// Connection handshake request
pub const INITIALIZE: &str = "initialize";

/// Notification sent by the client once `initialize` succeeded
pub const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";

/// Tool listing request
pub const LIST_TOOLS: &str = "tools/list";

/// Tool invocation request
pub const CALL_TOOL: &str = "tools/call";

/// Liveness probe
pub const PING: &str = "ping";
