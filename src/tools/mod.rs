//! Diagnostic tool registry.
//!
//! A tool is a named, schema-described operation that runs fixed SQL through a
//! [`SqlExecutor`] and returns a structured [`Report`]. The registry is built
//! once at startup and only read afterwards.

mod catalog;
mod connection;
mod health;
mod indexes;
mod locks;
pub mod params;
mod query;
mod tables;
mod workload;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::{JsonObject, Tool};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::db::SqlExecutor;
use crate::error::ToolError;
use crate::report::Report;

pub use catalog::{ListSchemas, ListTables};
pub use connection::TestConnection;
pub use health::HealthCheck;
pub use indexes::AnalyzeIndexUsage;
pub use locks::{ActiveQueries, GetBlockingQueries};
pub use query::{check_read_only, ExecuteQuery, ExplainQuery};
pub use tables::GetTableStats;
pub use workload::{GetSlowQueries, SuggestIndexes};

/// Names of the built-in tools, in registration order.
pub const TOOL_NAMES: [&str; 11] = [
    "test-connection",
    "list-schemas",
    "list-tables",
    "execute-query",
    "explain-query",
    "get-slow-queries",
    "health-check",
    "suggest-indexes",
    "get-table-stats",
    "analyze-index-usage",
    "get-blocking-queries",
];

#[async_trait]
pub trait DiagnosticTool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn input_schema(&self) -> Arc<JsonObject>;

    /// Run the tool. `args` is the raw `arguments` object of the call.
    async fn call(&self, db: &dyn SqlExecutor, args: Value) -> Result<Report, ToolError>;

    fn descriptor(&self) -> Tool {
        Tool::new(self.name(), self.description(), self.input_schema())
    }
}

/// JSON Schema of a parameter struct, as published by `tools/list`.
pub fn schema_for<P: JsonSchema>() -> Arc<JsonObject> {
    let schema = schemars::schema_for!(P);
    let mut object = match serde_json::to_value(&schema) {
        Ok(Value::Object(map)) => map,
        _ => JsonObject::new(),
    };
    object.remove("$schema");
    object.remove("title");
    object
        .entry("type")
        .or_insert_with(|| Value::String("object".to_string()));
    object
        .entry("properties")
        .or_insert_with(|| Value::Object(JsonObject::new()));
    Arc::new(object)
}

/// Validate `args` against a parameter struct, applying its defaults.
pub fn parse_args<P: DeserializeOwned>(args: Value) -> Result<P, ToolError> {
    let args = match args {
        Value::Null => Value::Object(JsonObject::new()),
        other => other,
    };
    serde_json::from_value(args).map_err(ToolError::from)
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn DiagnosticTool>>,
    by_name: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fixed catalog of diagnostic tools.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TestConnection));
        registry.register(Arc::new(ListSchemas));
        registry.register(Arc::new(ListTables));
        registry.register(Arc::new(ExecuteQuery));
        registry.register(Arc::new(ExplainQuery));
        registry.register(Arc::new(GetSlowQueries));
        registry.register(Arc::new(HealthCheck));
        registry.register(Arc::new(SuggestIndexes));
        registry.register(Arc::new(GetTableStats));
        registry.register(Arc::new(AnalyzeIndexUsage));
        registry.register(Arc::new(GetBlockingQueries));
        registry
    }

    /// Add a tool. A second tool with an already registered name is ignored.
    pub fn register(&mut self, tool: Arc<dyn DiagnosticTool>) {
        let name = tool.name();
        if self.by_name.contains_key(name) {
            tracing::warn!(tool = name, "duplicate tool registration ignored");
            return;
        }
        self.by_name.insert(name, self.tools.len());
        self.tools.push(tool);
    }

    pub fn list(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DiagnosticTool>> {
        self.by_name.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn invoke(
        &self,
        name: &str,
        db: &dyn SqlExecutor,
        args: Value,
    ) -> Result<Report, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.call(db, args).await
    }
}

/// Cut `s` to at most `max` characters, marking the cut with `...`.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Steps shown when `pg_stat_statements` is missing. The extension is never created automatically.
pub(crate) fn pg_stat_statements_steps() -> Vec<String> {
    vec![
        "Add 'pg_stat_statements' to shared_preload_libraries in postgresql.conf".to_string(),
        "Restart PostgreSQL".to_string(),
        "Run: CREATE EXTENSION pg_stat_statements;".to_string(),
    ]
}

pub(crate) async fn pg_stat_statements_available(db: &dyn SqlExecutor) -> Result<bool, ToolError> {
    use crate::db::RowExt;

    let rows = db
        .query(
            "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'pg_stat_statements') AS available",
            &[],
        )
        .await?;
    Ok(rows.first().map(|r| r.flag("available")).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MockExecutor;
    use serde_json::json;

    #[test]
    fn test_builtin_catalog() {
        let registry = ToolRegistry::builtin();
        assert_eq!(registry.len(), 11);
        assert_eq!(registry.names(), TOOL_NAMES.to_vec());
    }

    #[test]
    fn test_duplicate_registration_ignored() {
        let mut registry = ToolRegistry::builtin();
        registry.register(Arc::new(HealthCheck));
        assert_eq!(registry.len(), 11);
    }

    #[test]
    fn test_descriptors_have_object_schemas() {
        for tool in ToolRegistry::builtin().list() {
            assert_eq!(tool.input_schema.get("type"), Some(&json!("object")), "{}", tool.name);
            assert!(tool.description.is_some());
        }
    }

    #[test]
    fn test_schema_required_and_defaults() {
        let tool = ToolRegistry::builtin().get("explain-query").expect("tool");
        let schema = tool.input_schema();
        assert_eq!(schema["required"], json!(["query"]));
        assert_eq!(schema["properties"]["format"]["default"], json!("text"));

        let tool = ToolRegistry::builtin().get("list-tables").expect("tool");
        let schema = tool.input_schema();
        assert_eq!(schema["properties"]["schema"]["default"], json!("public"));
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = ToolRegistry::builtin();
        let db = MockExecutor::new();
        let err = registry
            .invoke("drop-everything", &db, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
        assert_eq!(db.calls(), 0);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
        assert_eq!(truncate("ééééé", 4), "é...");
    }

    #[test]
    fn test_parse_args_null_is_empty() {
        let p: params::ListTablesParams = parse_args(Value::Null).expect("params");
        assert_eq!(p.schema, "public");
    }
}
