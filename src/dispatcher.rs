//! Transport-agnostic JSON-RPC dispatch.
//!
//! Every transport hands raw frames to [`Dispatcher::handle`] and writes back
//! whatever it returns. Tool failures, including panics, become JSON-RPC error
//! objects here and never escape into the transport loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::{json, Map, Value};

use crate::db::SqlExecutor;
use crate::error::ToolError;
use crate::protocol::{
    codes, methods, server_info, tool_result, ErrorObject, Request, Response, JSONRPC_VERSION,
};
use crate::redact::Redactor;
use crate::report::Report;
use crate::tools::{DiagnosticTool, ToolRegistry};

pub struct Dispatcher {
    db: Arc<dyn SqlExecutor>,
    registry: Arc<ToolRegistry>,
    redactor: Redactor,
}

impl Dispatcher {
    pub fn new(db: Arc<dyn SqlExecutor>, registry: Arc<ToolRegistry>, redactor: Redactor) -> Self {
        Self {
            db,
            registry,
            redactor,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn db(&self) -> &dyn SqlExecutor {
        self.db.as_ref()
    }

    pub fn redact(&self, text: &str) -> String {
        self.redactor.redact(text)
    }

    /// Handle one raw frame. `None` means the frame was a notification.
    pub async fn handle(&self, raw: &[u8]) -> Option<Response> {
        match serde_json::from_slice::<Value>(raw) {
            Ok(value) => self.handle_value(value).await,
            Err(err) => {
                tracing::debug!("unparseable frame: {}", err);
                Some(Response::error(Some(Value::Null), codes::PARSE_ERROR, "Parse error"))
            }
        }
    }

    pub async fn handle_value(&self, value: Value) -> Option<Response> {
        match validate(value) {
            Ok(request) => self.dispatch(request).await,
            Err(response) => Some(response),
        }
    }

    async fn dispatch(&self, request: Request) -> Option<Response> {
        if request.method.starts_with(methods::NOTIFICATION_PREFIX) {
            tracing::debug!(method = %request.method, "notification received");
            return None;
        }

        let id = request.id.clone();
        let outcome = match request.method.as_str() {
            methods::INITIALIZE => Ok(self.initialize(&request.params).await),
            methods::LIST_TOOLS => self.list_tools(),
            methods::CALL_TOOL => self.call_tool(&request.params).await,
            methods::PING => Ok(json!({})),
            other => Err(ErrorObject {
                code: codes::METHOD_NOT_FOUND,
                message: format!("Method not found: {other}"),
            }),
        };

        Some(match outcome {
            Ok(result) => Response::success(id, result),
            Err(error) => Response::error(id, error.code, error.message),
        })
    }

    async fn initialize(&self, params: &Value) -> Value {
        if let Some(client) = params.get("clientInfo") {
            tracing::info!(
                client = client
                    .get("name")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown"),
                version = client
                    .get("version")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown"),
                "client initialized"
            );
        }

        if self.db.is_configured() {
            match self.db.probe(None).await {
                Ok(version) => tracing::info!(%version, "database connection ready"),
                Err(err) => tracing::warn!(
                    class = err.class(),
                    "database warm-up failed: {}",
                    self.redact(&err.to_string())
                ),
            }
        }

        serde_json::to_value(server_info()).unwrap_or_else(|_| json!({}))
    }

    fn list_tools(&self) -> Result<Value, ErrorObject> {
        serde_json::to_value(self.registry.list())
            .map(|tools| json!({ "tools": tools }))
            .map_err(|err| ErrorObject {
                code: codes::INTERNAL_ERROR,
                message: format!("Internal error: {err}"),
            })
    }

    async fn call_tool(&self, params: &Value) -> Result<Value, ErrorObject> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                self.error_object(&ToolError::InvalidParams(
                    "missing or non-string tool name".to_string(),
                ))
            })?;

        let args = match params.get("arguments") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(args @ Value::Object(_)) => args.clone(),
            Some(_) => {
                return Err(self.error_object(&ToolError::InvalidParams(
                    "arguments must be an object".to_string(),
                )))
            }
        };

        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| self.error_object(&ToolError::UnknownTool(name.to_string())))?;

        let report = self
            .run(tool.as_ref(), args)
            .await
            .map_err(|err| self.error_object(&err))?;

        serde_json::to_value(tool_result(report.render_text(), report.to_json())).map_err(|err| {
            ErrorObject {
                code: codes::INTERNAL_ERROR,
                message: format!("Internal error: {err}"),
            }
        })
    }

    /// Invoke a tool, converting a panic into [`ToolError::Internal`].
    pub async fn run(&self, tool: &dyn DiagnosticTool, args: Value) -> Result<Report, ToolError> {
        let started = Instant::now();
        let outcome = AssertUnwindSafe(tool.call(self.db.as_ref(), args))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ToolError::Internal(panic_message(panic))));

        match &outcome {
            Ok(_) => tracing::debug!(
                tool = tool.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "tool finished"
            ),
            Err(err) => tracing::warn!(
                tool = tool.name(),
                code = err.code(),
                "tool failed: {}",
                self.redact(&err.to_string())
            ),
        }
        outcome
    }

    fn error_object(&self, err: &ToolError) -> ErrorObject {
        ErrorObject {
            code: err.code(),
            message: self.redact(&err.to_string()),
        }
    }
}

fn validate(value: Value) -> Result<Request, Response> {
    let Value::Object(mut envelope) = value else {
        return Err(Response::error(
            Some(Value::Null),
            codes::INVALID_REQUEST,
            "Invalid Request: expected a JSON object",
        ));
    };

    let id = envelope.remove("id");
    // An invalid envelope still answers, with a null id when none was sent.
    let echo = Some(id.clone().unwrap_or(Value::Null));

    if envelope.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(Response::error(
            echo,
            codes::INVALID_REQUEST,
            "Invalid Request: jsonrpc must be \"2.0\"",
        ));
    }

    let method = match envelope.remove("method") {
        Some(Value::String(method)) if !method.is_empty() => method,
        _ => {
            return Err(Response::error(
                echo,
                codes::INVALID_REQUEST,
                "Invalid Request: method must be a non-empty string",
            ))
        }
    };

    let params = envelope.remove("params").unwrap_or(Value::Null);
    Ok(Request::new(method, params, id))
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("tool panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("tool panicked: {s}")
    } else {
        "tool panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MockExecutor;
    use crate::error::DbError;
    use crate::tools::params::NoParams;
    use crate::tools::schema_for;
    use async_trait::async_trait;
    use rmcp::model::JsonObject;

    fn dispatcher(db: MockExecutor) -> (Dispatcher, Arc<MockExecutor>) {
        let db = Arc::new(db);
        let d = Dispatcher::new(
            db.clone(),
            Arc::new(ToolRegistry::builtin()),
            Redactor::for_connection_string(Some("postgresql://app:hunter22@db:5432/prod")),
        );
        (d, db)
    }

    async fn roundtrip(d: &Dispatcher, frame: Value) -> Value {
        let resp = d
            .handle(frame.to_string().as_bytes())
            .await
            .expect("response");
        serde_json::to_value(resp).expect("json")
    }

    #[tokio::test]
    async fn test_parse_error() {
        let (d, _) = dispatcher(MockExecutor::new());
        let resp = d.handle(b"{not json").await.expect("response");
        assert_eq!(resp.error_code(), Some(-32700));
        assert_eq!(resp.id, Some(Value::Null));
        let v: Value = serde_json::from_str(&resp.to_json()).expect("json");
        assert_eq!(v.get("id"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let (d, _) = dispatcher(MockExecutor::new());
        for frame in [
            json!([1, 2, 3]),
            json!({"jsonrpc": "1.0", "method": "ping", "id": 1}),
            json!({"jsonrpc": "2.0", "method": 7, "id": 1}),
            json!({"jsonrpc": "2.0", "id": 1}),
        ] {
            let v = roundtrip(&d, frame).await;
            assert_eq!(v["error"]["code"], json!(-32600));
        }
        let v = roundtrip(&d, json!({"jsonrpc": "1.0", "method": "ping", "id": "x"})).await;
        assert_eq!(v["id"], json!("x"));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (d, _) = dispatcher(MockExecutor::new());
        let v = roundtrip(&d, json!({"jsonrpc": "2.0", "method": "resources/list", "id": 3})).await;
        assert_eq!(v["error"]["code"], json!(-32601));
        assert_eq!(v["error"]["message"], json!("Method not found: resources/list"));
    }

    #[tokio::test]
    async fn test_notifications_are_silent() {
        let (d, _) = dispatcher(MockExecutor::new());
        let frame = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        assert!(d.handle(frame.to_string().as_bytes()).await.is_none());
    }

    #[tokio::test]
    async fn test_initialize_and_ping() {
        let (d, db) = dispatcher(MockExecutor::new());
        let v = roundtrip(
            &d,
            json!({"jsonrpc": "2.0", "method": "initialize", "id": 1,
                   "params": {"clientInfo": {"name": "inspector", "version": "1.0"}}}),
        )
        .await;
        assert_eq!(v["result"]["serverInfo"]["name"], json!("pg-diag-mcp"));
        assert_eq!(db.calls(), 1);

        let v = roundtrip(&d, json!({"jsonrpc": "2.0", "method": "ping", "id": 2})).await;
        assert_eq!(v["result"], json!({}));
    }

    #[tokio::test]
    async fn test_request_without_id_gets_reply_without_id() {
        let (d, _) = dispatcher(MockExecutor::new());
        let resp = d
            .handle(br#"{"jsonrpc":"2.0","method":"ping"}"#)
            .await
            .expect("non-notification methods always answer");
        let v: Value = serde_json::from_str(&resp.to_json()).expect("json");
        assert_eq!(v["result"], json!({}));
        assert!(v.get("id").is_none(), "{v}");

        let v = roundtrip(&d, json!({"jsonrpc": "2.0", "method": "nope"})).await;
        assert_eq!(v["error"]["code"], json!(-32601));
        assert!(v.get("id").is_none(), "{v}");

        // A request that cannot be validated still echoes null.
        let v = roundtrip(&d, json!({"jsonrpc": "1.0", "method": "ping"})).await;
        assert_eq!(v["error"]["code"], json!(-32600));
        assert_eq!(v.get("id"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_initialize_survives_unreachable_database() {
        let (d, _) = dispatcher(MockExecutor::failing(DbError::Connection(
            "password authentication failed for postgresql://app:hunter22@db:5432/prod".into(),
        )));
        let v = roundtrip(&d, json!({"jsonrpc": "2.0", "method": "initialize", "id": 1})).await;
        assert!(v.get("error").is_none());
    }

    #[tokio::test]
    async fn test_tools_list() {
        let (d, _) = dispatcher(MockExecutor::new());
        let v = roundtrip(&d, json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1})).await;
        let tools = v["result"]["tools"].as_array().expect("tools");
        assert_eq!(tools.len(), 11);
        assert!(tools.iter().all(|t| t["inputSchema"]["type"] == json!("object")));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_invalid_params() {
        let (d, db) = dispatcher(MockExecutor::new());
        let v = roundtrip(
            &d,
            json!({"jsonrpc": "2.0", "method": "tools/call", "id": 9,
                   "params": {"name": "table-bloat-analysis"}}),
        )
        .await;
        assert_eq!(v["error"]["code"], json!(-32602));
        assert_eq!(v["error"]["message"], json!("Unknown tool: table-bloat-analysis"));
        assert_eq!(v["id"], json!(9));
        assert_eq!(db.calls(), 0);
    }

    #[tokio::test]
    async fn test_bad_call_params() {
        let (d, _) = dispatcher(MockExecutor::new());
        for params in [
            json!({}),
            json!({"name": 5}),
            json!({"name": "list-tables", "arguments": [1]}),
            json!({"name": "execute-query", "arguments": {}}),
        ] {
            let v = roundtrip(
                &d,
                json!({"jsonrpc": "2.0", "method": "tools/call", "id": 1, "params": params}),
            )
            .await;
            assert_eq!(v["error"]["code"], json!(-32602), "{params}");
        }
    }

    #[tokio::test]
    async fn test_rejected_query_never_reaches_database() {
        let (d, db) = dispatcher(MockExecutor::new());
        let v = roundtrip(
            &d,
            json!({"jsonrpc": "2.0", "method": "tools/call", "id": 1,
                   "params": {"name": "execute-query", "arguments": {"query": "DROP TABLE x"}}}),
        )
        .await;
        assert_eq!(v["error"]["code"], json!(-32602));
        assert_eq!(
            v["error"]["message"],
            json!("Only SELECT, EXPLAIN and SET queries are allowed")
        );
        assert_eq!(db.calls(), 0);
    }

    #[tokio::test]
    async fn test_database_error_is_redacted() {
        let (d, _) = dispatcher(MockExecutor::failing(DbError::Connection(
            "could not connect to postgresql://app:hunter22@db:5432/prod".into(),
        )));
        let v = roundtrip(
            &d,
            json!({"jsonrpc": "2.0", "method": "tools/call", "id": 1,
                   "params": {"name": "health-check"}}),
        )
        .await;
        assert_eq!(v["error"]["code"], json!(-32603));
        let message = v["error"]["message"].as_str().expect("message");
        assert!(!message.contains("hunter22"), "{message}");
    }

    #[tokio::test]
    async fn test_tool_result_shape() {
        let (d, _) = dispatcher(MockExecutor::new());
        let v = roundtrip(
            &d,
            json!({"jsonrpc": "2.0", "method": "tools/call", "id": 1,
                   "params": {"name": "test-connection", "arguments": null}}),
        )
        .await;
        let result = &v["result"];
        assert_eq!(result["content"][0]["type"], json!("text"));
        assert!(result["content"][0]["text"]
            .as_str()
            .expect("text")
            .starts_with("Successfully connected"));
        assert_eq!(result["structuredContent"]["connected"], json!(true));
    }

    struct Exploding;

    #[async_trait]
    impl DiagnosticTool for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        fn description(&self) -> &'static str {
            "panics"
        }

        fn input_schema(&self) -> Arc<JsonObject> {
            schema_for::<NoParams>()
        }

        async fn call(&self, _db: &dyn SqlExecutor, _args: Value) -> Result<Report, ToolError> {
            panic!("boom")
        }
    }

    #[tokio::test]
    async fn test_panicking_tool_becomes_internal_error() {
        let mut registry = ToolRegistry::builtin();
        registry.register(Arc::new(Exploding));
        let d = Dispatcher::new(
            Arc::new(MockExecutor::new()),
            Arc::new(registry),
            Redactor::default(),
        );
        let v = roundtrip(
            &d,
            json!({"jsonrpc": "2.0", "method": "tools/call", "id": 1,
                   "params": {"name": "exploding"}}),
        )
        .await;
        assert_eq!(v["error"]["code"], json!(-32603));
        assert_eq!(v["error"]["message"], json!("Internal error: tool panicked: boom"));

        // The dispatcher keeps serving.
        let v = roundtrip(&d, json!({"jsonrpc": "2.0", "method": "ping", "id": 2})).await;
        assert_eq!(v["result"], json!({}));
    }
}
