//! Tools built on `pg_stat_statements`: `get-slow-queries` and `suggest-indexes`.
//!
//! Neither tool tries to create the extension. When it is missing the slow
//! query report says how to enable it and the index advisor falls back to
//! looking at table structure.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use rmcp::model::JsonObject;
use serde_json::Value;

use super::params::{SlowQueriesParams, SuggestIndexesParams};
use super::{
    parse_args, pg_stat_statements_available, pg_stat_statements_steps, schema_for, truncate,
    DiagnosticTool,
};
use crate::db::{quote_ident, RowExt, SqlExecutor, SqlParam};
use crate::error::ToolError;
use crate::report::{
    Finding, IndexSuggestionReport, Report, SlowQuery, SlowQueryReport, SuggestionMode,
    UnindexedForeignKey, WorkloadQuery,
};

const SLOW_QUERIES_SQL: &str = "
    SELECT
        query,
        calls::int8 AS calls,
        total_exec_time::float8 AS total_ms,
        mean_exec_time::float8 AS mean_ms,
        min_exec_time::float8 AS min_ms,
        max_exec_time::float8 AS max_ms,
        stddev_exec_time::float8 AS stddev_ms,
        rows::int8 AS rows,
        (100.0 * shared_blks_hit / NULLIF(shared_blks_hit + shared_blks_read, 0))::float8 AS cache_hit
    FROM pg_stat_statements
    WHERE mean_exec_time > $1::float8
      AND query NOT LIKE 'EXPLAIN%'
      AND query NOT LIKE '%pg_stat_statements%'
    ORDER BY mean_exec_time DESC
    LIMIT $2::int8";

const WORKLOAD_SQL: &str = "
    SELECT
        query,
        calls::int8 AS calls,
        mean_exec_time::float8 AS mean_ms,
        total_exec_time::float8 AS total_ms
    FROM pg_stat_statements
    WHERE query NOT LIKE '%pg_stat_statements%'
      AND query NOT LIKE 'COMMIT%'
      AND query NOT LIKE 'BEGIN%'
      AND query NOT LIKE 'SET%'
      AND calls >= $1::int8
      AND mean_exec_time >= $2::float8
    ORDER BY total_exec_time DESC
    LIMIT $3::int8";

const INDEX_EXISTS_SQL: &str = "
    SELECT count(*)::int8 AS matches
    FROM pg_indexes
    WHERE tablename = $1::text
      AND indexdef LIKE $2::text";

const TABLES_WITHOUT_PK_SQL: &str = "
    SELECT n.nspname::text AS schema_name, c.relname::text AS table_name
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind IN ('r', 'p')
      AND n.nspname NOT IN ('pg_catalog', 'information_schema')
      AND n.nspname NOT LIKE 'pg_toast%'
      AND NOT EXISTS (
          SELECT 1 FROM pg_constraint con
          WHERE con.conrelid = c.oid AND con.contype = 'p'
      )
    ORDER BY 1, 2";

const UNINDEXED_FK_SQL: &str = "
    SELECT DISTINCT
        tc.table_schema::text AS table_schema,
        tc.table_name::text AS table_name,
        kcu.column_name::text AS column_name,
        ccu.table_schema::text AS foreign_schema,
        ccu.table_name::text AS foreign_table
    FROM information_schema.table_constraints AS tc
    JOIN information_schema.key_column_usage AS kcu
        ON tc.constraint_name = kcu.constraint_name
       AND tc.table_schema = kcu.table_schema
    JOIN information_schema.constraint_column_usage AS ccu
        ON ccu.constraint_name = tc.constraint_name
       AND ccu.table_schema = tc.table_schema
    WHERE tc.constraint_type = 'FOREIGN KEY'
      AND NOT EXISTS (
          SELECT 1 FROM pg_indexes i
          WHERE i.schemaname = tc.table_schema
            AND i.tablename = tc.table_name
            AND i.indexdef LIKE '%' || kcu.column_name || '%'
      )
    ORDER BY 1, 2, 3";

const MAX_RECOMMENDATIONS: usize = 10;

// ============================================================================
// get-slow-queries
// ============================================================================

pub struct GetSlowQueries;

#[async_trait]
impl DiagnosticTool for GetSlowQueries {
    fn name(&self) -> &'static str {
        "get-slow-queries"
    }

    fn description(&self) -> &'static str {
        "Get the slowest queries from pg_stat_statements with tuning hints"
    }

    fn input_schema(&self) -> Arc<JsonObject> {
        schema_for::<SlowQueriesParams>()
    }

    async fn call(&self, db: &dyn SqlExecutor, args: Value) -> Result<Report, ToolError> {
        let params: SlowQueriesParams = parse_args(args)?;
        if params.limit < 1 {
            return Err(ToolError::InvalidParams("limit must be at least 1".to_string()));
        }

        if !pg_stat_statements_available(db).await? {
            return Ok(Report::SlowQueries(SlowQueryReport {
                extension_available: false,
                threshold_ms: params.min_duration_ms,
                limit: params.limit,
                queries: Vec::new(),
                enable_steps: pg_stat_statements_steps(),
            }));
        }

        let rows = db
            .query(
                SLOW_QUERIES_SQL,
                &[params.min_duration_ms.into(), params.limit.into()],
            )
            .await?;

        let queries = rows
            .iter()
            .map(|r| {
                let calls = r.int("calls");
                let rows = r.int("rows");
                let mut q = SlowQuery {
                    query: truncate(&r.text("query"), 200),
                    calls,
                    total_ms: r.float("total_ms"),
                    mean_ms: r.float("mean_ms"),
                    min_ms: r.float("min_ms"),
                    max_ms: r.float("max_ms"),
                    stddev_ms: r.float("stddev_ms"),
                    rows,
                    rows_per_call: if calls > 0 { rows as f64 / calls as f64 } else { 0.0 },
                    cache_hit_percent: r.opt_float("cache_hit").unwrap_or(0.0),
                    suggestions: Vec::new(),
                };
                q.suggestions = slow_query_hints(&q);
                q
            })
            .collect();

        Ok(Report::SlowQueries(SlowQueryReport {
            extension_available: true,
            threshold_ms: params.min_duration_ms,
            limit: params.limit,
            queries,
            enable_steps: Vec::new(),
        }))
    }
}

fn slow_query_hints(q: &SlowQuery) -> Vec<String> {
    let mut hints = Vec::new();
    if q.stddev_ms > q.mean_ms * 0.5 {
        hints.push("High variance in execution time, investigate data distribution".to_string());
    }
    if q.cache_hit_percent < 90.0 {
        hints.push(format!(
            "Low cache hit ratio ({:.1}%), consider increasing shared_buffers",
            q.cache_hit_percent
        ));
    }
    if q.rows_per_call > 1000.0 {
        hints.push(
            "Returning many rows per call, consider pagination or more selective filters"
                .to_string(),
        );
    }
    if q.calls > 10_000 {
        hints.push("Very frequent execution, consider caching or query optimization".to_string());
    }

    let upper = q.query.to_uppercase();
    if upper.contains("LIKE '%") {
        hints.push("Leading wildcard in LIKE cannot use an index effectively".to_string());
    }
    if upper.contains("NOT IN") || upper.contains("NOT EXISTS") {
        hints.push("NOT IN/EXISTS can be slow, consider LEFT JOIN with a NULL check".to_string());
    }
    if upper.contains(" OR ") {
        hints.push("OR conditions might prevent index usage, consider UNION".to_string());
    }
    if upper.contains("DISTINCT") {
        hints.push("DISTINCT can be expensive, ensure proper indexes".to_string());
    }

    if hints.is_empty() {
        hints.push("Run EXPLAIN ANALYZE on this query for detailed analysis".to_string());
    }
    hints
}

// ============================================================================
// suggest-indexes
// ============================================================================

static FILTER_COLUMNS: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"where\s+(\w+)\.(\w+)\s*(?:=|like|in\b|between)").expect("static regex"),
        Regex::new(r"and\s+(\w+)\.(\w+)\s*(?:=|like)").expect("static regex"),
    ]
});
static JOIN_ON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"join\s+(\w+)\s+(?:\w+\s+)?on\s+\w+\.(\w+)\s*=\s*\w+\.(\w+)")
        .expect("static regex")
});
static ORDER_BY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"order\s+by\s+(?:\w+\.)?\w+").expect("static regex"));
static LIKE_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"like\s+'([^']*)'").expect("static regex"));

/// `table.column` pairs a query filters on, in order of appearance.
fn filtered_columns(query_lower: &str) -> Vec<(String, String)> {
    let mut found: Vec<(String, String)> = Vec::new();
    for re in FILTER_COLUMNS.iter() {
        for caps in re.captures_iter(query_lower) {
            let pair = (caps[1].to_string(), caps[2].to_string());
            if !found.contains(&pair) {
                found.push(pair);
            }
        }
    }
    found
}

fn pattern_notes(query: &str, query_lower: &str) -> Vec<Finding> {
    let mut notes = Vec::new();
    if JOIN_ON.is_match(query_lower) {
        notes.push(Finding::info("JOIN detected, ensure indexes on join columns"));
    }
    if ORDER_BY.is_match(query_lower) {
        notes.push(Finding::info("ORDER BY detected, consider an index for sorting"));
    }
    if query_lower.contains("like") && (query.contains('%') || query.contains('_')) {
        if let Some(caps) = LIKE_LITERAL.captures(query_lower) {
            if caps[1].starts_with('%') {
                notes.push(Finding::warning(
                    "Leading wildcard pattern detected, consider full-text search",
                ));
            } else {
                notes.push(Finding::info("LIKE pattern, consider a prefix index"));
            }
        }
    }
    notes
}

fn index_statement(table: &str, column: &str) -> String {
    format!(
        "CREATE INDEX {} ON {} ({});",
        quote_ident(&format!("idx_{table}_{column}")),
        quote_ident(table),
        quote_ident(column)
    )
}

pub struct SuggestIndexes;

impl SuggestIndexes {
    async fn workload(
        &self,
        db: &dyn SqlExecutor,
        params: &SuggestIndexesParams,
    ) -> Result<IndexSuggestionReport, ToolError> {
        let rows = db
            .query(
                WORKLOAD_SQL,
                &[
                    params.min_calls.into(),
                    params.min_duration_ms.into(),
                    params.limit.into(),
                ],
            )
            .await?;

        let mut known: HashMap<(String, String), bool> = HashMap::new();
        let mut recommended: Vec<String> = Vec::new();
        let mut queries = Vec::with_capacity(rows.len());

        for row in &rows {
            let query = row.text("query");
            let lower = query.to_lowercase();

            let mut missing = Vec::new();
            for (table, column) in filtered_columns(&lower) {
                let key = (table.clone(), column.clone());
                let indexed = match known.get(&key) {
                    Some(&hit) => hit,
                    None => {
                        let found = db
                            .query(
                                INDEX_EXISTS_SQL,
                                &[
                                    SqlParam::from(table.as_str()),
                                    SqlParam::from(format!("%{column}%")),
                                ],
                            )
                            .await?;
                        let hit = found.first().map(|r| r.int("matches") > 0).unwrap_or(false);
                        known.insert(key, hit);
                        hit
                    }
                };
                if !indexed {
                    missing.push(format!("{table}.{column}"));
                    let stmt = index_statement(&table, &column);
                    if !recommended.contains(&stmt) {
                        recommended.push(stmt);
                    }
                }
            }

            queries.push(WorkloadQuery {
                query: truncate(&query, 100),
                calls: row.int("calls"),
                mean_ms: row.float("mean_ms"),
                total_ms: row.float("total_ms"),
                missing_indexes: missing,
                notes: pattern_notes(&query, &lower),
            });
        }
        recommended.truncate(MAX_RECOMMENDATIONS);

        Ok(IndexSuggestionReport {
            mode: SuggestionMode::Workload,
            min_calls: params.min_calls,
            min_duration_ms: params.min_duration_ms,
            queries,
            recommended_indexes: recommended,
            tables_without_pk: Vec::new(),
            unindexed_foreign_keys: Vec::new(),
            enable_steps: Vec::new(),
        })
    }

    async fn structural(
        &self,
        db: &dyn SqlExecutor,
        params: &SuggestIndexesParams,
    ) -> Result<IndexSuggestionReport, ToolError> {
        let tables_without_pk = db
            .query(TABLES_WITHOUT_PK_SQL, &[])
            .await?
            .iter()
            .map(|r| format!("{}.{}", r.text("schema_name"), r.text("table_name")))
            .collect();

        let unindexed_foreign_keys = db
            .query(UNINDEXED_FK_SQL, &[])
            .await?
            .iter()
            .map(|r| {
                let schema = r.text("table_schema");
                let table = r.text("table_name");
                let column = r.text("column_name");
                let suggestion = format!(
                    "CREATE INDEX {} ON {}.{} ({});",
                    quote_ident(&format!("idx_{table}_{column}")),
                    quote_ident(&schema),
                    quote_ident(&table),
                    quote_ident(&column)
                );
                UnindexedForeignKey {
                    references: format!("{}.{}", r.text("foreign_schema"), r.text("foreign_table")),
                    schema,
                    table,
                    column,
                    suggestion,
                }
            })
            .collect();

        Ok(IndexSuggestionReport {
            mode: SuggestionMode::Structural,
            min_calls: params.min_calls,
            min_duration_ms: params.min_duration_ms,
            queries: Vec::new(),
            recommended_indexes: Vec::new(),
            tables_without_pk,
            unindexed_foreign_keys,
            enable_steps: pg_stat_statements_steps(),
        })
    }
}

#[async_trait]
impl DiagnosticTool for SuggestIndexes {
    fn name(&self) -> &'static str {
        "suggest-indexes"
    }

    fn description(&self) -> &'static str {
        "Analyze the query workload and suggest missing indexes"
    }

    fn input_schema(&self) -> Arc<JsonObject> {
        schema_for::<SuggestIndexesParams>()
    }

    async fn call(&self, db: &dyn SqlExecutor, args: Value) -> Result<Report, ToolError> {
        let params: SuggestIndexesParams = parse_args(args)?;
        if params.limit < 1 {
            return Err(ToolError::InvalidParams("limit must be at least 1".to_string()));
        }

        let report = if pg_stat_statements_available(db).await? {
            self.workload(db, &params).await?
        } else {
            self.structural(db, &params).await?
        };
        Ok(Report::IndexSuggestions(report))
    }
}
