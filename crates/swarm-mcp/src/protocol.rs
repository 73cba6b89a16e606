//! JSON-RPC 2.0 message types for the MCP stdio transport.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const JSONRPC_VERSION: &str = "2.0";
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_PARAMS: i64 = -32602;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params: Some(params),
            id: Some(json!(id)),
        }
    }

    pub fn notification(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params: Some(params),
            id: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// MCP tool definition advertised by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

/// A successful `tools/call` result wrapping plain text.
pub fn text_content(text: &str) -> Value {
    json!({
        "content": [{"type": "text", "text": text}],
    })
}

/// A failed `tools/call` result; tool errors travel as content so the caller
/// agent can reason about them, not as protocol errors.
pub fn error_content(text: &str) -> Value {
    json!({
        "content": [{"type": "text", "text": text}],
        "isError": true,
    })
}

/// Join the text blocks of a `tools/call` result.
pub fn content_text(result: &Value) -> String {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

pub fn is_error_result(result: &Value) -> bool {
    result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let request = JsonRpcRequest::new(7, "tools/list", json!({}));
        let encoded = serde_json::to_string(&request).unwrap();
        let decoded: JsonRpcRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.method, "tools/list");
        assert_eq!(decoded.id, Some(json!(7)));
        assert!(!decoded.is_notification());
    }

    #[test]
    fn test_notification_has_no_id() {
        let note = JsonRpcRequest::notification("notifications/initialized", json!({}));
        assert!(note.is_notification());
        let encoded = serde_json::to_string(&note).unwrap();
        assert!(!encoded.contains("\"id\""));
    }

    #[test]
    fn test_failure_response_shape() {
        let response = JsonRpcResponse::failure(Some(json!(1)), METHOD_NOT_FOUND, "nope");
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded["error"]["code"], -32601);
        assert_eq!(encoded["error"]["message"], "nope");
        assert!(encoded.get("result").is_none());
    }

    #[test]
    fn test_content_text_joins_blocks() {
        let result = json!({
            "content": [
                {"type": "text", "text": "one"},
                {"type": "image", "data": "..."},
                {"type": "text", "text": "two"},
            ],
        });
        assert_eq!(content_text(&result), "one\ntwo");
        assert!(!is_error_result(&result));
    }

    #[test]
    fn test_error_content_is_flagged() {
        let result = error_content("boom");
        assert!(is_error_result(&result));
        assert_eq!(content_text(&result), "boom");
    }
}
