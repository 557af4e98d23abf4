//! Auth metadata injection for outgoing requests

use mcprouter_protocol::methods;
use serde_json::{Map, Value, json};

use crate::error::{ClientError, ClientResult};

/// Build the metadata object carried in `params._meta`
pub(super) fn metadata(auth: Map<String, Value>) -> Value {
    json!({ "auth": auth })
}

/// Write `metadata` into `params._meta` and, for `initialize`, into
/// `params.capabilities.experimental`
///
/// Other `_meta` members are kept. Missing or `null` params become an object.
pub(super) fn inject(message: &mut Value, metadata: &Value) -> ClientResult<()> {
    let Some(object) = message.as_object_mut() else {
        return Err(ClientError::malformed_message(
            "invalid request message: not a JSON object",
        ));
    };
    let is_initialize = object.get("method").and_then(Value::as_str) == Some(methods::INITIALIZE);

    let params = object
        .entry("params")
        .or_insert_with(|| Value::Object(Map::new()));
    if params.is_null() {
        *params = Value::Object(Map::new());
    }
    let Some(params) = params.as_object_mut() else {
        return Err(ClientError::malformed_message(
            "failed to modify message: params must be an object",
        ));
    };

    let meta = params
        .entry("_meta")
        .or_insert_with(|| Value::Object(Map::new()));
    match (meta.as_object_mut(), metadata.as_object()) {
        (Some(meta), Some(metadata)) => {
            for (key, value) in metadata {
                meta.insert(key.clone(), value.clone());
            }
        }
        _ => *meta = metadata.clone(),
    }

    if is_initialize {
        let capabilities = params
            .entry("capabilities")
            .or_insert_with(|| Value::Object(Map::new()));
        if capabilities.is_null() {
            *capabilities = Value::Object(Map::new());
        }
        let Some(capabilities) = capabilities.as_object_mut() else {
            return Err(ClientError::malformed_message(
                "failed to modify initialize message: capabilities must be an object",
            ));
        };
        capabilities.insert("experimental".to_string(), metadata.clone());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn auth() -> Value {
        let mut params = Map::new();
        params.insert("token".into(), json!("t-1"));
        metadata(params)
    }

    #[test]
    fn test_inject_creates_params() {
        let mut message = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"});
        inject(&mut message, &auth()).unwrap();
        assert_eq!(
            message,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/list",
                "params": {"_meta": {"auth": {"token": "t-1"}}}
            })
        );
    }

    #[test]
    fn test_inject_keeps_existing_meta_members() {
        let mut message = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {"name": "echo", "_meta": {"progressToken": 7}}
        });
        inject(&mut message, &auth()).unwrap();
        assert_eq!(
            message["params"]["_meta"],
            json!({"progressToken": 7, "auth": {"token": "t-1"}})
        );
        assert_eq!(message["params"]["name"], json!("echo"));
    }

    #[test]
    fn test_inject_initialize_sets_experimental() {
        let mut message = json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {"protocolVersion": "2025-06-18", "capabilities": {"roots": {}}}
        });
        inject(&mut message, &auth()).unwrap();
        assert_eq!(
            message["params"]["capabilities"],
            json!({"roots": {}, "experimental": {"auth": {"token": "t-1"}}})
        );
    }

    #[test]
    fn test_inject_null_params() {
        let mut message = json!({"jsonrpc": "2.0", "method": "notifications/initialized", "params": null});
        inject(&mut message, &metadata(Map::new())).unwrap();
        assert_eq!(message["params"], json!({"_meta": {"auth": {}}}));
    }

    #[test]
    fn test_inject_rejects_positional_params() {
        let mut message = json!({"jsonrpc": "2.0", "id": 3, "method": "sum", "params": [1, 2]});
        let err = inject(&mut message, &auth()).unwrap_err();
        assert!(matches!(err, ClientError::MalformedMessage(_)));
    }
}
