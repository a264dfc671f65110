//! Argument types for the diagnostic tools.
//!
//! Each struct doubles as the tool's input schema (via schemars) and as its
//! validator (via serde). Missing optional fields take the struct's `Default`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ============================================================================
// Connection / catalog
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TestConnectionParams {
    #[schemars(description = "PostgreSQL connection URL to test (defaults to the configured DATABASE_URI)")]
    pub database_url: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct NoParams {}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ListTablesParams {
    #[schemars(description = "Schema name")]
    pub schema: String,
}

impl Default for ListTablesParams {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
        }
    }
}

// ============================================================================
// Queries and plans
// ============================================================================

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteQueryParams {
    #[schemars(description = "SQL query to execute (SELECT, EXPLAIN or SET)")]
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ExplainQueryParams {
    #[schemars(description = "SQL query to explain")]
    pub query: String,
    #[serde(default)]
    #[schemars(description = "Execute the query to collect actual timings (EXPLAIN ANALYZE)")]
    pub analyze: bool,
    #[serde(default)]
    #[schemars(description = "Include buffer usage statistics (requires analyze)")]
    pub buffers: bool,
    #[serde(default = "default_plan_format")]
    #[schemars(description = "Output format: text, json, xml or yaml")]
    pub format: String,
}

fn default_plan_format() -> String {
    "text".to_string()
}

// ============================================================================
// Workload
// ============================================================================

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SlowQueriesParams {
    #[schemars(description = "Minimum mean execution time in milliseconds")]
    pub min_duration_ms: f64,
    #[schemars(description = "Maximum number of queries to return")]
    pub limit: i64,
}

impl Default for SlowQueriesParams {
    fn default() -> Self {
        Self {
            min_duration_ms: 1000.0,
            limit: 20,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SuggestIndexesParams {
    #[schemars(description = "Minimum number of calls for a query to be considered")]
    pub min_calls: i64,
    #[schemars(description = "Minimum mean execution time in milliseconds")]
    pub min_duration_ms: f64,
    #[schemars(description = "Number of top queries to analyze")]
    pub limit: i64,
}

impl Default for SuggestIndexesParams {
    fn default() -> Self {
        Self {
            min_calls: 10,
            min_duration_ms: 100.0,
            limit: 10,
        }
    }
}

// ============================================================================
// Tables, indexes, locks
// ============================================================================

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TableStatsParams {
    #[schemars(description = "Schema name")]
    pub schema: String,
    #[schemars(description = "Table name pattern (SQL LIKE)")]
    pub table_pattern: String,
    #[schemars(description = "Include TOAST table sizes")]
    pub include_toast: bool,
    #[schemars(description = "Include per-index details")]
    pub include_indexes: bool,
}

impl Default for TableStatsParams {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            table_pattern: "%".to_string(),
            include_toast: false,
            include_indexes: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct IndexUsageParams {
    #[schemars(description = "Schema name")]
    pub schema: String,
    #[schemars(description = "Minimum index size in MB")]
    pub min_size_mb: f64,
    #[schemars(description = "Days without use to flag an index (informational)")]
    pub days_unused: i64,
}

impl Default for IndexUsageParams {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            min_size_mb: 1.0,
            days_unused: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BlockingQueriesParams {
    #[schemars(description = "Include processes waiting for locks")]
    pub include_locks: bool,
    #[schemars(description = "Minimum duration in milliseconds for long-running queries")]
    pub min_duration_ms: f64,
}

impl Default for BlockingQueriesParams {
    fn default() -> Self {
        Self {
            include_locks: true,
            min_duration_ms: 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_applied() {
        let p: SlowQueriesParams = serde_json::from_value(json!({})).expect("params");
        assert_eq!(p.min_duration_ms, 1000.0);
        assert_eq!(p.limit, 20);

        let p: TableStatsParams =
            serde_json::from_value(json!({"include_toast": true})).expect("params");
        assert_eq!(p.schema, "public");
        assert_eq!(p.table_pattern, "%");
        assert!(p.include_toast);
        assert!(p.include_indexes);
    }

    #[test]
    fn test_integer_accepted_for_float_field() {
        let p: BlockingQueriesParams =
            serde_json::from_value(json!({"min_duration_ms": 250})).expect("params");
        assert_eq!(p.min_duration_ms, 250.0);
    }

    #[test]
    fn test_required_query() {
        assert!(serde_json::from_value::<ExecuteQueryParams>(json!({})).is_err());
        let p: ExplainQueryParams =
            serde_json::from_value(json!({"query": "SELECT 1"})).expect("params");
        assert_eq!(p.format, "text");
        assert!(!p.analyze);
    }

    #[test]
    fn test_wrong_type_rejected() {
        assert!(serde_json::from_value::<SlowQueriesParams>(json!({"limit": "ten"})).is_err());
    }
}
