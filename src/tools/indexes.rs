//! `analyze-index-usage`: unused, rarely used, duplicate and oversized indexes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::JsonObject;
use serde_json::Value;

use super::params::IndexUsageParams;
use super::{parse_args, schema_for, DiagnosticTool};
use crate::db::{RowExt, SqlExecutor, SqlParam};
use crate::error::ToolError;
use crate::report::{DuplicateIndex, IndexInfo, IndexUsageReport, OversizedIndex, Report};

const INDEX_USAGE_SQL: &str = "
    SELECT
        n.nspname::text AS schema_name,
        t.relname::text AS table_name,
        i.relname::text AS index_name,
        x.indisprimary AS is_primary,
        x.indisunique AS is_unique,
        pg_relation_size(i.oid)::int8 AS index_bytes,
        pg_relation_size(t.oid)::int8 AS table_bytes,
        COALESCE(s.idx_scan, 0)::int8 AS index_scans,
        array_to_string(
            ARRAY(
                SELECT pg_get_indexdef(i.oid, k, true)
                FROM generate_series(1, x.indnkeyatts::int) AS k
            ),
            ', '
        ) AS index_columns,
        pg_get_indexdef(i.oid) AS index_definition
    FROM pg_index x
    JOIN pg_class i ON i.oid = x.indexrelid
    JOIN pg_class t ON t.oid = x.indrelid
    JOIN pg_namespace n ON n.oid = i.relnamespace
    LEFT JOIN pg_stat_user_indexes s ON s.indexrelid = x.indexrelid
    WHERE n.nspname = $1::text
      AND i.relkind = 'i'
      AND pg_relation_size(i.oid) >= $2::float8 * 1024 * 1024
    ORDER BY
        CASE WHEN COALESCE(s.idx_scan, 0) = 0 THEN 0 ELSE 1 END,
        pg_relation_size(i.oid) DESC";

const RARE_SCAN_THRESHOLD: i64 = 100;

pub struct AnalyzeIndexUsage;

#[async_trait]
impl DiagnosticTool for AnalyzeIndexUsage {
    fn name(&self) -> &'static str {
        "analyze-index-usage"
    }

    fn description(&self) -> &'static str {
        "Find unused, rarely used, duplicate and oversized indexes"
    }

    fn input_schema(&self) -> Arc<JsonObject> {
        schema_for::<IndexUsageParams>()
    }

    async fn call(&self, db: &dyn SqlExecutor, args: Value) -> Result<Report, ToolError> {
        let params: IndexUsageParams = parse_args(args)?;
        if params.min_size_mb < 0.0 {
            return Err(ToolError::InvalidParams(
                "min_size_mb must not be negative".to_string(),
            ));
        }

        let rows = db
            .query(
                INDEX_USAGE_SQL,
                &[
                    SqlParam::from(params.schema.as_str()),
                    SqlParam::from(params.min_size_mb),
                ],
            )
            .await?;

        let mut report = IndexUsageReport {
            schema: params.schema.clone(),
            min_size_mb: params.min_size_mb,
            days_unused: params.days_unused,
            total_indexes: rows.len(),
            total_bytes: 0,
            unused: Vec::new(),
            rarely_used: Vec::new(),
            duplicates: Vec::new(),
            oversized: Vec::new(),
            unused_bytes: 0,
            savings_percent: None,
        };
        // (schema.table, columns) -> first index seen with that column list
        let mut seen: HashMap<(String, String), String> = HashMap::new();

        for row in &rows {
            let index = IndexInfo {
                schema: row.text("schema_name"),
                table: row.text("table_name"),
                name: row.text("index_name"),
                is_primary: row.flag("is_primary"),
                is_unique: row.flag("is_unique"),
                bytes: row.int("index_bytes"),
                scans: row.int("index_scans"),
                columns: row.text("index_columns"),
                definition: row.text("index_definition"),
            };
            let table_bytes = row.int("table_bytes");
            report.total_bytes += index.bytes;

            let table_key = format!("{}.{}", index.schema, index.table);
            match seen.get(&(table_key.clone(), index.columns.clone())) {
                Some(kept) => report.duplicates.push(DuplicateIndex {
                    table: table_key.clone(),
                    kept: kept.clone(),
                    duplicate: index.name.clone(),
                    columns: index.columns.clone(),
                }),
                None => {
                    seen.insert((table_key, index.columns.clone()), index.name.clone());
                }
            }

            if !index.is_primary && index.bytes as f64 > table_bytes as f64 * 0.5 {
                report.oversized.push(OversizedIndex {
                    ratio: if table_bytes > 0 {
                        index.bytes as f64 / table_bytes as f64
                    } else {
                        0.0
                    },
                    table_bytes,
                    index: index.clone(),
                });
            }

            if index.scans == 0 && !index.is_primary {
                report.unused_bytes += index.bytes;
                report.unused.push(index);
            } else if index.scans < RARE_SCAN_THRESHOLD && !index.is_primary && !index.is_unique {
                report.rarely_used.push(index);
            }
        }

        if report.unused_bytes > 0 && report.total_bytes > 0 {
            report.savings_percent =
                Some(report.unused_bytes as f64 * 100.0 / report.total_bytes as f64);
        }

        Ok(Report::IndexUsage(report))
    }
}
