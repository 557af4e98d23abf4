//! MCP payload shapes for the calls the router issues
//!
//! Every struct keeps unknown members in a flattened `extra` map so that a
//! backend's result can be decoded, inspected and re-encoded for the client
//! without losing fields this crate does not model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::LATEST_PROTOCOL_VERSION;

/// Name and version of an MCP client or server implementation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name
    pub name: String,
    /// Implementation version
    pub version: String,
    /// Members not modelled here
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Implementation {
    /// Create an implementation descriptor
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            extra: Map::new(),
        }
    }
}

/// Capabilities a client announces during `initialize`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Non-standard capabilities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
    /// Roots support
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<Value>,
    /// Sampling support
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
    /// Members not modelled here
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parameters of the `initialize` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol revision requested by the client
    pub protocol_version: String,
    /// Client capabilities
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    /// Client implementation info
    pub client_info: Implementation,
}

impl InitializeParams {
    /// Parameters announcing the latest protocol revision and no capabilities
    pub fn new(client_info: Implementation) -> Self {
        Self {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info,
        }
    }
}

/// Capabilities a server announces in its `initialize` result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Non-standard capabilities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
    /// Logging support
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
    /// Prompt support
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
    /// Resource support
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    /// Tool support
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    /// Members not modelled here
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of the `initialize` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol revision chosen by the server
    pub protocol_version: String,
    /// Server capabilities
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Server implementation info
    pub server_info: Implementation,
    /// Optional usage instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Members not modelled here
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A tool exposed by a backend server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Programmatic tool name
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the accepted arguments
    #[serde(default)]
    pub input_schema: Value,
    /// Members not modelled here
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of `tools/list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// Tools on this page
    pub tools: Vec<Tool>,
    /// Continuation token for the next page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// Members not modelled here
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parameters of `tools/call`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool to invoke
    pub name: String,
    /// Tool arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
}

impl CallToolParams {
    /// Create call parameters
    pub fn new(name: impl Into<String>, arguments: Option<Map<String, Value>>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// One content block of a tool result
///
/// Only the `type` tag and the `text` member are modelled; image, audio and
/// resource blocks are carried through `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Block type (`text`, `image`, `audio`, `resource`, ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Text payload for `text` blocks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Members not modelled here
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Content {
    /// Create a text block
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }

    /// Text payload if this is a text block
    pub fn as_text(&self) -> Option<&str> {
        if self.kind == "text" {
            self.text.as_deref()
        } else {
            None
        }
    }
}

/// Result of `tools/call`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content blocks produced by the tool
    #[serde(default)]
    pub content: Vec<Content>,
    /// Whether the tool reported a tool-level failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    /// Structured output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    /// Members not modelled here
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_initialize_params_wire_names() {
        let params = InitializeParams::new(Implementation::new("mcprouter", "0.3.0"));
        let encoded = serde_json::to_value(&params).unwrap();
        assert_eq!(
            encoded,
            json!({
                "protocolVersion": LATEST_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "mcprouter", "version": "0.3.0"}
            })
        );
    }

    #[test]
    fn test_initialize_result_keeps_unknown_members() {
        let raw = json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {"tools": {"listChanged": true}},
            "serverInfo": {"name": "weather", "version": "1.2.0", "title": "Weather"},
            "vendorHint": "x"
        });
        let result: InitializeResult = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(result.server_info.name, "weather");
        assert_eq!(result.extra.get("vendorHint"), Some(&json!("x")));
        assert_eq!(serde_json::to_value(&result).unwrap(), raw);
    }

    #[test]
    fn test_list_tools_result() {
        let raw = json!({
            "tools": [{
                "name": "get_forecast",
                "description": "Forecast for a city",
                "inputSchema": {"type": "object", "properties": {"city": {"type": "string"}}}
            }],
            "nextCursor": "page-2"
        });
        let result: ListToolsResult = serde_json::from_value(raw).unwrap();
        assert_eq!(result.tools.len(), 1);
        assert_eq!(result.tools[0].name, "get_forecast");
        assert_eq!(result.next_cursor.as_deref(), Some("page-2"));
    }

    #[test]
    fn test_call_tool_result_content_blocks() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "sunny"},
                {"type": "image", "data": "aGk=", "mimeType": "image/png"}
            ],
            "isError": false
        });
        let result: CallToolResult = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(result.content[0].as_text(), Some("sunny"));
        assert_eq!(result.content[1].as_text(), None);
        assert_eq!(result.content[1].extra.get("mimeType"), Some(&json!("image/png")));
        assert_eq!(serde_json::to_value(&result).unwrap(), raw);
    }

    #[test]
    fn test_call_tool_params_omit_missing_arguments() {
        let params = CallToolParams::new("ping", None);
        assert_eq!(serde_json::to_value(&params).unwrap(), json!({"name": "ping"}));
    }
}
