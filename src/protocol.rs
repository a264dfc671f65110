//! JSON-RPC envelopes and MCP payloads.
//!
//! The envelope types are deliberately loose (`Value` params and id) so the
//! dispatcher can validate them field by field and answer with the right error
//! code. MCP result bodies are built from rmcp's model types.

use rmcp::model::{
    CallToolResult, Content, Implementation, InitializeResult, ProtocolVersion,
    ServerCapabilities, ToolsCapability,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Method names understood by the dispatcher.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const LIST_TOOLS: &str = "tools/list";
    pub const CALL_TOOL: &str = "tools/call";
    pub const PING: &str = "ping";
    pub const NOTIFICATION_PREFIX: &str = "notifications/";
    /// Sent to bare SSE clients once the stream is open.
    pub const CONNECTION_READY: &str = "connection/ready";
}

/// A validated request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Value, id: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

/// A response envelope. Exactly one of `result` and `error` is set.
///
/// `id` is omitted when the request carried none. Frames whose id could not be
/// read at all (parse errors, non-object envelopes) answer with `"id": null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl Response {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(ErrorObject {
                code,
                message: message.into(),
            }),
            id,
        }
    }

    pub fn error_code(&self) -> Option<i64> {
        self.error.as_ref().map(|e| e.code)
    }

    pub fn to_json(&self) -> String {
        // Serializing a struct of Strings and Values cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"serialization failed"},"id":null}"#
                .to_string()
        })
    }
}

/// A server-to-client notification (no id).
pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}

pub const SERVER_NAME: &str = "pg-diag-mcp";

/// The `initialize` result.
pub fn server_info() -> InitializeResult {
    InitializeResult {
        protocol_version: ProtocolVersion::default(),
        capabilities: ServerCapabilities {
            tools: Some(ToolsCapability { list_changed: None }),
            ..Default::default()
        },
        server_info: Implementation {
            name: SERVER_NAME.to_string(),
            title: Some("PostgreSQL Diagnostics MCP Server".to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            icons: None,
            website_url: None,
        },
        instructions: Some(
            "PostgreSQL diagnostics: schema listing, read-only queries, query plans, slow queries, \
             health, index and lock analysis"
                .to_string(),
        ),
    }
}

/// A `tools/call` result carrying the rendered text and the structured report.
pub fn tool_result(text: String, structured: Value) -> CallToolResult {
    let mut result = CallToolResult::success(vec![Content::text(text)]);
    result.structured_content = Some(structured);
    result
}
