//! `execute-query` and `explain-query`.
//!
//! Both run caller-supplied SQL, so both go through the read-only guard. The
//! guard is a keyword scan, not a parser: a SELECT mentioning `'DROP'` in a
//! string literal is refused, and anything starting with EXPLAIN or SET is let
//! through unchecked (including `EXPLAIN ANALYZE UPDATE ...`).
//!
//! `explain-query` wraps the caller's text in its own EXPLAIN and sends it over
//! the simple query protocol, which runs every `;`-separated statement. It
//! therefore accepts exactly one statement; a trailing `;` is dropped.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use rmcp::model::JsonObject;
use serde_json::Value;

use super::params::{ExecuteQueryParams, ExplainQueryParams};
use super::{parse_args, schema_for, DiagnosticTool};
use crate::db::SqlExecutor;
use crate::error::ToolError;
use crate::report::{Finding, PlanReport, PlanTiming, QueryOutput, Report};

const RESTRICTED_KEYWORDS: [&str; 7] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE",
];

pub const READ_ONLY_MESSAGE: &str = "Only SELECT, EXPLAIN and SET queries are allowed";

const PLAN_FORMATS: [&str; 4] = ["text", "json", "xml", "yaml"];

/// Refuse statements that look like DML or DDL.
pub fn check_read_only(query: &str) -> Result<(), ToolError> {
    let upper = query.trim().to_uppercase();
    if upper.starts_with("EXPLAIN") || upper.starts_with("SET") {
        return Ok(());
    }
    if RESTRICTED_KEYWORDS.iter().any(|kw| upper.contains(kw)) {
        return Err(ToolError::Rejected(READ_ONLY_MESSAGE.to_string()));
    }
    Ok(())
}

/// The statement without trailing `;`. Any other `;` is refused, quoted or not.
fn single_statement(query: &str) -> Result<&str, ToolError> {
    let statement = query.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if statement.contains(';') {
        return Err(ToolError::Rejected(
            "explain-query accepts a single statement without ';' separators".to_string(),
        ));
    }
    Ok(statement)
}

fn require_query(query: &str) -> Result<(), ToolError> {
    if query.trim().is_empty() {
        return Err(ToolError::InvalidParams("query must not be empty".to_string()));
    }
    Ok(())
}

pub struct ExecuteQuery;

#[async_trait]
impl DiagnosticTool for ExecuteQuery {
    fn name(&self) -> &'static str {
        "execute-query"
    }

    fn description(&self) -> &'static str {
        "Execute a read-only SQL query (SELECT, EXPLAIN or SET) and return the rows"
    }

    fn input_schema(&self) -> Arc<JsonObject> {
        schema_for::<ExecuteQueryParams>()
    }

    async fn call(&self, db: &dyn SqlExecutor, args: Value) -> Result<Report, ToolError> {
        let params: ExecuteQueryParams = parse_args(args)?;
        require_query(&params.query)?;
        check_read_only(&params.query)?;

        let result = db.query_text(&params.query).await?;
        Ok(Report::Query(QueryOutput {
            row_count: result.rows.len(),
            columns: result.columns,
            rows: result.rows,
        }))
    }
}

pub struct ExplainQuery;

#[async_trait]
impl DiagnosticTool for ExplainQuery {
    fn name(&self) -> &'static str {
        "explain-query"
    }

    fn description(&self) -> &'static str {
        "Show the execution plan of a query with a performance analysis"
    }

    fn input_schema(&self) -> Arc<JsonObject> {
        schema_for::<ExplainQueryParams>()
    }

    async fn call(&self, db: &dyn SqlExecutor, args: Value) -> Result<Report, ToolError> {
        let params: ExplainQueryParams = parse_args(args)?;
        require_query(&params.query)?;

        let format = params.format.trim().to_lowercase();
        if !PLAN_FORMATS.contains(&format.as_str()) {
            return Err(ToolError::InvalidParams(format!(
                "format must be one of text, json, xml, yaml (got '{}')",
                params.format
            )));
        }
        let statement = single_statement(&params.query)?;
        // ANALYZE executes the statement.
        if params.analyze {
            check_read_only(statement)?;
        }

        let sql = explain_sql(statement, &format, params.analyze, params.buffers);
        let result = db.query_text(&sql).await?;
        let lines: Vec<String> = result
            .rows
            .iter()
            .filter_map(|row| row.values().next())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();

        let mut report = PlanReport {
            format: format.clone(),
            analyze: params.analyze,
            buffers: params.buffers && params.analyze,
            plan_lines: Vec::new(),
            document: None,
            timing: None,
            findings: Vec::new(),
            tips: Vec::new(),
        };

        if format == "text" {
            let analysis = analyze_plan(&lines.join("\n"), params.analyze);
            report.timing = analysis.timing;
            report.findings = analysis.findings;
            report.tips = plan_tips(params.analyze, params.buffers);
            report.plan_lines = lines;
        } else {
            let raw = lines.join("\n");
            report.document = Some(if format == "json" {
                serde_json::from_str(&raw).unwrap_or(Value::String(raw))
            } else {
                Value::String(raw)
            });
        }

        Ok(Report::Plan(report))
    }
}

fn explain_sql(query: &str, format: &str, analyze: bool, buffers: bool) -> String {
    let mut options = vec![format!("FORMAT {}", format.to_uppercase())];
    if analyze {
        options.push("ANALYZE true".to_string());
        if buffers {
            options.push("BUFFERS true".to_string());
        }
    }
    format!("EXPLAIN ({}) {}", options.join(", "), query.trim())
}

fn plan_tips(analyze: bool, buffers: bool) -> Vec<String> {
    let mut tips = Vec::new();
    if !analyze {
        tips.push("Run with analyze=true to see actual execution times".to_string());
    }
    if analyze && !buffers {
        tips.push("Run with buffers=true to see buffer usage statistics".to_string());
    }
    tips.push("Consider EXPLAIN (VERBOSE) for more details".to_string());
    tips
}

static SEQ_SCAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Seq Scan on (\w+)").expect("static regex"));
static NESTED_LOOP_ROWS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Nested Loop.*actual time=[\d.]+\.\.[\d.]+.*rows=(\d+)").expect("static regex")
});
static TIMING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)Planning Time:\s*([\d.]+)\s*ms.*Execution Time:\s*([\d.]+)\s*ms")
        .expect("static regex")
});
static BATCHES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Batches:\s*(\d+)").expect("static regex"));
static ROWS_REMOVED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)rows removed by filter:\s*(\d+)").expect("static regex"));
static SORT_METHOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Sort Method:\s*(\w+)").expect("static regex"));

pub(crate) struct PlanAnalysis {
    pub timing: Option<PlanTiming>,
    pub findings: Vec<Finding>,
}

/// Heuristics over a text-format plan.
pub(crate) fn analyze_plan(plan: &str, analyze: bool) -> PlanAnalysis {
    let mut findings = Vec::new();

    let mut seen = HashSet::new();
    for caps in SEQ_SCAN.captures_iter(plan) {
        let table = &caps[1];
        if !seen.insert(table.to_string()) {
            continue;
        }
        let cost = Regex::new(&format!(
            r"Seq Scan on {}\b.*cost=[\d.]+\.\.(\d+\.\d+)",
            regex::escape(table)
        ))
        .ok()
        .and_then(|re| re.captures(plan))
        .and_then(|c| c[1].parse::<f64>().ok());
        match cost {
            Some(c) if c > 1000.0 => findings.push(Finding::warning(format!(
                "High-cost sequential scan on '{table}'. Consider adding an index."
            ))),
            _ => findings.push(Finding::info(format!(
                "Sequential scan on '{table}'. May need an index if the table is large."
            ))),
        }
    }

    if plan.contains("Nested Loop") {
        if analyze {
            let large = NESTED_LOOP_ROWS
                .captures_iter(plan)
                .filter_map(|c| c[1].parse::<u64>().ok())
                .any(|rows| rows > 10_000);
            if large {
                findings.push(Finding::warning(
                    "Nested loop with high row count. Consider hash or merge join.",
                ));
            }
        } else {
            findings.push(Finding::info(
                "Nested loop detected. Run with analyze=true for performance metrics.",
            ));
        }
    }

    let mut timing = None;
    if analyze {
        if let Some(caps) = TIMING.captures(plan) {
            let planning: f64 = caps[1].parse().unwrap_or_default();
            let execution: f64 = caps[2].parse().unwrap_or_default();
            if execution > 1000.0 {
                findings.push(Finding::warning(format!(
                    "Slow query execution: {execution:.1}ms. Optimization needed."
                )));
            }
            if planning > 100.0 {
                findings.push(Finding::info(format!(
                    "High planning time: {planning:.1}ms. Complex query structure."
                )));
            }
            timing = Some(PlanTiming {
                planning_ms: planning,
                execution_ms: execution,
                total_ms: planning + execution,
            });
        }
    }

    if plan.to_lowercase().contains("external") {
        findings.push(Finding::warning(
            "External disk operations detected. Consider increasing work_mem.",
        ));
    }

    if plan.contains("Hash") {
        let spilled = BATCHES
            .captures_iter(plan)
            .filter_map(|c| c[1].parse::<u64>().ok())
            .any(|b| b > 1);
        if spilled {
            findings.push(Finding::warning(
                "Hash join spilling to disk. Increase work_mem for better performance.",
            ));
        }
    }

    if plan.contains("Index Scan") {
        findings.push(Finding::good("Using index scan, good for selective queries."));
    } else if plan.contains("Bitmap") {
        findings.push(Finding::good(
            "Using bitmap scan, efficient for multiple matching rows.",
        ));
    }

    let removed: u64 = ROWS_REMOVED
        .captures_iter(plan)
        .filter_map(|c| c[1].parse::<u64>().ok())
        .sum();
    if removed > 1000 {
        findings.push(Finding::warning(format!(
            "Filter removing {removed} rows. Consider more selective conditions or indexes."
        )));
    }

    if plan.contains("Sort") {
        if let Some(caps) = SORT_METHOD.captures(plan) {
            let method = &caps[1];
            if method == "external" {
                findings.push(Finding::warning("External sort (disk). Increase work_mem."));
            } else {
                findings.push(Finding::good(format!("In-memory sort ({method}).")));
            }
        }
    }

    PlanAnalysis { timing, findings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MockExecutor;
    use crate::report::Severity;
    use serde_json::json;

    #[test]
    fn test_read_only_guard() {
        assert!(check_read_only("SELECT 1").is_ok());
        assert!(check_read_only("  select * from users").is_ok());
        assert!(check_read_only("SET statement_timeout = 0").is_ok());

        let err = check_read_only("DROP TABLE x").unwrap_err();
        assert!(matches!(err, ToolError::Rejected(_)));
        assert_eq!(err.to_string(), READ_ONLY_MESSAGE);
        assert_eq!(err.code(), -32602);

        assert!(check_read_only("delete from users").is_err());
    }

    #[test]
    fn test_explain_prefix_bypasses_keyword_scan() {
        // Known weak spot: EXPLAIN ANALYZE executes the UPDATE.
        assert!(check_read_only("EXPLAIN ANALYZE UPDATE t SET x=1").is_ok());
    }

    #[test]
    fn test_keyword_inside_literal_is_refused() {
        assert!(check_read_only("SELECT 'please do not DROP' AS note").is_err());
    }

    #[tokio::test]
    async fn test_execute_query_rejects_before_db() {
        let db = MockExecutor::new();
        let err = ExecuteQuery
            .call(&db, json!({"query": "TRUNCATE audit"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Rejected(_)));
        assert_eq!(db.calls(), 0);
    }

    #[tokio::test]
    async fn test_execute_query_rows() {
        let db = MockExecutor::new().on("SELECT", vec![json!({"a": "1"}), json!({"a": "2"})]);
        let report = ExecuteQuery
            .call(&db, json!({"query": "SELECT a FROM t"}))
            .await
            .expect("report");
        let v = report.to_json();
        assert_eq!(v["row_count"], json!(2));
        assert_eq!(v["columns"], json!(["a"]));
    }

    #[tokio::test]
    async fn test_execute_query_missing_query() {
        let db = MockExecutor::new();
        let err = ExecuteQuery.call(&db, json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[test]
    fn test_explain_sql_options() {
        assert_eq!(
            explain_sql("SELECT 1", "text", false, true),
            "EXPLAIN (FORMAT TEXT) SELECT 1"
        );
        assert_eq!(
            explain_sql("SELECT 1", "json", true, true),
            "EXPLAIN (FORMAT JSON, ANALYZE true, BUFFERS true) SELECT 1"
        );
    }

    #[tokio::test]
    async fn test_explain_rejects_bad_format() {
        let db = MockExecutor::new();
        let err = ExplainQuery
            .call(&db, json!({"query": "SELECT 1", "format": "html"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32602);
        assert_eq!(db.calls(), 0);
    }

    #[tokio::test]
    async fn test_explain_analyze_guards_writes() {
        let db = MockExecutor::new();
        let err = ExplainQuery
            .call(&db, json!({"query": "DELETE FROM t", "analyze": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Rejected(_)));

        // Without ANALYZE nothing executes, so the plan is allowed.
        ExplainQuery
            .call(&db, json!({"query": "DELETE FROM t"}))
            .await
            .expect("plain explain");
    }

    #[test]
    fn test_single_statement() {
        assert_eq!(single_statement("SELECT 1").expect("ok"), "SELECT 1");
        assert_eq!(single_statement("  SELECT 1 ;; \n").expect("ok"), "SELECT 1");
        assert!(single_statement("SELECT 1; DROP TABLE users").is_err());
        assert!(single_statement("SELECT ';' AS sep").is_err());
    }

    #[tokio::test]
    async fn test_explain_refuses_stacked_statements() {
        let db = MockExecutor::new();
        for analyze in [false, true] {
            let err = ExplainQuery
                .call(
                    &db,
                    json!({"query": "SELECT 1; DROP TABLE users", "analyze": analyze}),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, ToolError::Rejected(_)));
            assert_eq!(err.code(), -32602);
        }
        assert_eq!(db.calls(), 0);

        ExplainQuery
            .call(&db, json!({"query": "SELECT 1;"}))
            .await
            .expect("trailing separator is fine");
        let (sql, _) = db.executed().pop().expect("explain sent");
        assert_eq!(sql, "EXPLAIN (FORMAT TEXT) SELECT 1");
    }

    #[tokio::test]
    async fn test_explain_text_report() {
        let db = MockExecutor::new().on(
            "EXPLAIN",
            vec![
                json!({"QUERY PLAN": "Seq Scan on orders  (cost=0.00..4580.00 rows=100000 width=64)"}),
                json!({"QUERY PLAN": "  Filter: (status = 'open'::text)"}),
            ],
        );
        let report = ExplainQuery
            .call(&db, json!({"query": "SELECT * FROM orders WHERE status = 'open'"}))
            .await
            .expect("report");
        let Report::Plan(plan) = &report else {
            panic!("wrong report");
        };
        assert_eq!(plan.plan_lines.len(), 2);
        assert_eq!(plan.findings[0].severity, Severity::Warning);
        assert!(report.render_text().contains("High-cost sequential scan on 'orders'"));
    }

    #[test]
    fn test_analyze_plan_heuristics() {
        let plan = "\
Sort  (cost=10.00..10.50 rows=10 width=8) (actual time=0.1..0.2 rows=10 loops=1)
  Sort Key: id
  Sort Method: quicksort  Memory: 25kB
  ->  Index Scan using users_pkey on users  (cost=0.29..8.30 rows=1 width=8)
        Rows Removed by Filter: 5000
Planning Time: 150.5 ms
Execution Time: 1200.25 ms";
        let analysis = analyze_plan(plan, true);
        let timing = analysis.timing.expect("timing");
        assert_eq!(timing.planning_ms, 150.5);
        assert_eq!(timing.execution_ms, 1200.25);

        let messages: Vec<&str> = analysis.findings.iter().map(|f| f.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.starts_with("Slow query execution")));
        assert!(messages.iter().any(|m| m.starts_with("High planning time")));
        assert!(messages.iter().any(|m| m.starts_with("Using index scan")));
        assert!(messages.iter().any(|m| m.starts_with("Filter removing 5000 rows")));
        assert!(messages.iter().any(|m| *m == "In-memory sort (quicksort)."));
    }

    #[test]
    fn test_analyze_plan_cheap_seq_scan_and_nested_loop_hint() {
        let plan = "Nested Loop  (cost=0.00..20.00 rows=1 width=8)\n  ->  Seq Scan on tiny  (cost=0.00..1.01 rows=1 width=4)";
        let analysis = analyze_plan(plan, false);
        assert!(analysis.timing.is_none());
        assert!(analysis
            .findings
            .iter()
            .all(|f| f.severity == Severity::Info));
        assert_eq!(analysis.findings.len(), 2);
    }
}
