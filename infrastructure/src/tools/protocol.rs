//! JSON-RPC 2.0 and MCP message types for tool provider communication.
//!
//! Frames are newline-delimited JSON objects.
//!
//! - **Requests**: client → provider (`initialize`, `tools/list`, `tools/call`, `ping`)
//! - **Responses**: provider → client (result or error)
//! - **Notifications**: either direction (`notifications/initialized`, `notifications/cancelled`)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision sent during `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error code for an unsupported method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// JSON-RPC notification (no id, no response)
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> JsonRpcNotification<'a> {
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// JSON-RPC response, as received
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<RpcErrorObject>,
}

/// JSON-RPC response, as sent back for provider-initiated requests
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponseOut {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl JsonRpcResponseOut {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Classification of an incoming frame.
#[derive(Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// A response to a request we sent (has `id`, no `method`)
    Response,
    /// A request from the provider (has `id` + `method`), e.g. `ping`
    IncomingRequest,
    /// A notification (has `method`, no `id`)
    Notification,
    /// Neither shape; a protocol violation
    Invalid,
}

/// Classify a JSON-RPC frame by inspecting `id` and `method` fields.
pub fn classify_message(json: &Value) -> MessageKind {
    let has_id = json.get("id").is_some_and(|id| !id.is_null());
    let has_method = json.get("method").and_then(Value::as_str).is_some();

    match (has_id, has_method) {
        (true, true) => MessageKind::IncomingRequest,
        (true, false) => MessageKind::Response,
        (false, true) => MessageKind::Notification,
        (false, false) => MessageKind::Invalid,
    }
}

// ==================== MCP payloads ====================

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: &'static str,
    pub capabilities: Map<String, Value>,
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: &'static str,
    pub version: &'static str,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION,
            capabilities: Map::new(),
            client_info: ClientInfo {
                name: "pentree",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}

/// One entry of a `tools/list` result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Content block of a `tools/call` result.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    /// Text blocks joined by newlines; structured content when there is no text.
    pub fn text(&self) -> String {
        let text: Vec<&str> = self
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect();
        if text.is_empty()
            && let Some(structured) = &self.structured_content
        {
            return structured.to_string();
        }
        text.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_response() {
        assert_eq!(
            classify_message(&json!({"jsonrpc": "2.0", "id": 1, "result": {}})),
            MessageKind::Response
        );
    }

    #[test]
    fn classify_incoming_request() {
        assert_eq!(
            classify_message(&json!({"id": "a", "method": "ping"})),
            MessageKind::IncomingRequest
        );
    }

    #[test]
    fn classify_notification_and_garbage() {
        assert_eq!(
            classify_message(&json!({"method": "notifications/progress"})),
            MessageKind::Notification
        );
        assert_eq!(classify_message(&json!({"data": 1})), MessageKind::Invalid);
    }

    #[test]
    fn request_serializes_without_null_params() {
        let json = serde_json::to_value(JsonRpcRequest::new(7, "ping", None)).unwrap();
        assert_eq!(json, json!({"jsonrpc": "2.0", "id": 7, "method": "ping"}));
    }

    #[test]
    fn tools_list_parses_schema() {
        let result: ToolsListResult = serde_json::from_value(json!({
            "tools": [{
                "name": "nmap_scan",
                "description": "Scan ports",
                "inputSchema": {"type": "object", "properties": {"target": {"type": "string"}}}
            }],
            "nextCursor": "page2"
        }))
        .unwrap();
        assert_eq!(result.tools[0].name, "nmap_scan");
        assert_eq!(result.next_cursor.as_deref(), Some("page2"));
        assert!(result.tools[0].input_schema.get("properties").is_some());
    }

    #[test]
    fn call_result_text_skips_non_text_blocks() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "image", "data": "...", "mimeType": "image/png"},
                {"type": "text", "text": "22/tcp open ssh"},
                {"type": "text", "text": "80/tcp open http"}
            ]
        }))
        .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "22/tcp open ssh\n80/tcp open http");
    }

    #[test]
    fn call_result_falls_back_to_structured_content() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [],
            "structuredContent": {"findings": []}
        }))
        .unwrap();
        assert_eq!(result.text(), r#"{"findings":[]}"#);
    }
}
