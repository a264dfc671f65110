//! `get-table-stats`: storage, activity and maintenance figures per table.

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::JsonObject;
use serde_json::Value;

use super::params::TableStatsParams;
use super::{parse_args, schema_for, DiagnosticTool};
use crate::db::{Row, RowExt, SqlExecutor, SqlParam};
use crate::error::ToolError;
use crate::report::{
    Finding, IndexBrief, Report, TableActivity, TableStats, TableStatsReport,
};

const TABLE_STATS_SQL: &str = "
    SELECT
        c.relname::text AS table_name,
        c.relkind::text AS relkind,
        obj_description(c.oid, 'pg_class') AS description,
        c.reltuples::int8 AS row_estimate,
        pg_table_size(c.oid)::int8 AS table_bytes,
        pg_indexes_size(c.oid)::int8 AS index_bytes,
        pg_total_relation_size(c.oid)::int8 AS total_bytes,
        COALESCE(toast.reltuples, 0)::int8 AS toast_rows,
        COALESCE(pg_table_size(toast.oid), 0)::int8 AS toast_bytes,
        age(c.relfrozenxid)::int8 AS xid_age,
        (SELECT count(*) FROM pg_index x WHERE x.indrelid = c.oid)::int8 AS index_count,
        s.n_live_tup::int8 AS live_tuples,
        s.n_dead_tup::int8 AS dead_tuples,
        s.n_tup_ins::int8 AS inserts,
        s.n_tup_upd::int8 AS updates,
        s.n_tup_del::int8 AS deletes,
        s.n_tup_hot_upd::int8 AS hot_updates,
        s.n_mod_since_analyze::int8 AS mods_since_analyze,
        s.last_vacuum::text AS last_vacuum,
        s.last_autovacuum::text AS last_autovacuum,
        s.last_analyze::text AS last_analyze,
        s.last_autoanalyze::text AS last_autoanalyze
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    LEFT JOIN pg_class toast ON toast.oid = c.reltoastrelid
    LEFT JOIN pg_stat_user_tables s ON s.relid = c.oid
    WHERE c.relkind IN ('r', 'p')
      AND n.nspname = $1::text
      AND c.relname LIKE $2::text
    ORDER BY pg_total_relation_size(c.oid) DESC";

const TABLE_INDEXES_SQL: &str = "
    SELECT
        s.indexrelname::text AS index_name,
        pg_relation_size(s.indexrelid)::int8 AS bytes,
        s.idx_scan::int8 AS scans
    FROM pg_stat_user_indexes s
    WHERE s.schemaname = $1::text
      AND s.relname = $2::text
    ORDER BY pg_relation_size(s.indexrelid) DESC";

const XID_FREEZE_NOW: i64 = 1_000_000_000;
const XID_FREEZE_SOON: i64 = 500_000_000;

fn kind_label(relkind: &str) -> &'static str {
    match relkind {
        "p" => "Partitioned Table",
        _ => "Table",
    }
}

fn activity(row: &Row) -> Option<TableActivity> {
    // No pg_stat_user_tables row (e.g. partitioned parents): live_tuples is NULL.
    row.get("live_tuples").filter(|v| !v.is_null())?;
    let live = row.int("live_tuples");
    let dead = row.int("dead_tuples");
    let updates = row.int("updates");
    Some(TableActivity {
        live_tuples: live,
        dead_tuples: dead,
        bloat_ratio: (live > 0).then(|| dead as f64 * 100.0 / live as f64),
        inserts: row.int("inserts"),
        updates,
        deletes: row.int("deletes"),
        hot_update_ratio: (updates > 0)
            .then(|| row.int("hot_updates") as f64 * 100.0 / updates as f64),
    })
}

fn table_findings(activity: Option<&TableActivity>, xid_age: i64) -> Vec<Finding> {
    let mut findings = Vec::new();
    if let Some(ratio) = activity.and_then(|a| a.bloat_ratio) {
        if ratio > 20.0 {
            findings.push(Finding::warning(format!(
                "High bloat ({ratio:.1}% dead tuples), consider VACUUM"
            )));
        }
    }
    if xid_age > XID_FREEZE_NOW {
        findings.push(Finding::warning(format!(
            "Transaction ID age {xid_age}: VACUUM FREEZE needed"
        )));
    } else if xid_age > XID_FREEZE_SOON {
        findings.push(Finding::info(format!(
            "Transaction ID age {xid_age}: plan VACUUM FREEZE"
        )));
    }
    findings
}

pub struct GetTableStats;

#[async_trait]
impl DiagnosticTool for GetTableStats {
    fn name(&self) -> &'static str {
        "get-table-stats"
    }

    fn description(&self) -> &'static str {
        "Get detailed statistics for tables: size, activity, maintenance and bloat"
    }

    fn input_schema(&self) -> Arc<JsonObject> {
        schema_for::<TableStatsParams>()
    }

    async fn call(&self, db: &dyn SqlExecutor, args: Value) -> Result<Report, ToolError> {
        let params: TableStatsParams = parse_args(args)?;
        let rows = db
            .query(
                TABLE_STATS_SQL,
                &[
                    SqlParam::from(params.schema.as_str()),
                    SqlParam::from(params.table_pattern.as_str()),
                ],
            )
            .await?;

        let mut tables = Vec::with_capacity(rows.len());
        let mut high_bloat = Vec::new();
        let mut needs_analyze = Vec::new();

        for row in &rows {
            let name = row.text("table_name");
            let index_count = row.int("index_count");

            let indexes = if params.include_indexes && index_count > 0 {
                db.query(
                    TABLE_INDEXES_SQL,
                    &[
                        SqlParam::from(params.schema.as_str()),
                        SqlParam::from(name.as_str()),
                    ],
                )
                .await?
                .iter()
                .map(|r| IndexBrief {
                    name: r.text("index_name"),
                    bytes: r.int("bytes"),
                    scans: r.int("scans"),
                })
                .collect()
            } else {
                Vec::new()
            };

            let activity = activity(row);
            let xid_age = row.int("xid_age");
            let mods = row.int("mods_since_analyze");

            if let Some(a) = &activity {
                if a.live_tuples > 0 && a.dead_tuples as f64 / a.live_tuples as f64 > 0.2 {
                    high_bloat.push(name.clone());
                }
                if mods > 0 && mods as f64 > a.live_tuples as f64 * 0.1 {
                    needs_analyze.push(name.clone());
                }
            }

            tables.push(TableStats {
                kind: kind_label(&row.text("relkind")).to_string(),
                description: row.opt_text("description"),
                estimated_rows: row.int("row_estimate").max(0),
                table_bytes: row.int("table_bytes"),
                index_bytes: row.int("index_bytes"),
                total_bytes: row.int("total_bytes"),
                toast_bytes: params
                    .include_toast
                    .then(|| row.int("toast_bytes"))
                    .filter(|b| *b > 0),
                toast_rows: params
                    .include_toast
                    .then(|| row.int("toast_rows"))
                    .filter(|_| row.int("toast_bytes") > 0),
                index_count,
                indexes,
                findings: table_findings(activity.as_ref(), xid_age),
                activity,
                last_vacuum: row.opt_text("last_vacuum"),
                last_autovacuum: row.opt_text("last_autovacuum"),
                last_analyze: row.opt_text("last_analyze"),
                last_autoanalyze: row.opt_text("last_autoanalyze"),
                modifications_since_analyze: mods,
                xid_age,
                name,
            });
        }

        let total_rows = tables.iter().map(|t| t.estimated_rows).sum();
        let total_bytes = tables.iter().map(|t| t.total_bytes).sum();

        Ok(Report::TableStats(TableStatsReport {
            schema: params.schema,
            table_pattern: params.table_pattern,
            tables,
            total_rows,
            total_bytes,
            high_bloat,
            needs_analyze,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MockExecutor;
    use crate::report::Severity;
    use serde_json::json;

    fn orders_row() -> Value {
        json!({
            "table_name": "orders", "relkind": "r", "description": "Customer orders",
            "row_estimate": 100000, "table_bytes": 8388608, "index_bytes": 2097152,
            "total_bytes": 10485760, "toast_rows": 10, "toast_bytes": 8192,
            "xid_age": 600000000, "index_count": 2,
            "live_tuples": 100000, "dead_tuples": 30000,
            "inserts": 150000, "updates": 4000, "deletes": 20000, "hot_updates": 1000,
            "mods_since_analyze": 25000,
            "last_vacuum": null, "last_autovacuum": "2026-10-01 03:00:00+00",
            "last_analyze": null, "last_autoanalyze": null
        })
    }

    #[tokio::test]
    async fn test_table_stats() {
        let db = MockExecutor::new()
            .on(
                "pg_stat_user_indexes",
                vec![json!({"index_name": "orders_pkey", "bytes": 1048576, "scans": 5000})],
            )
            .on("reltoastrelid", vec![orders_row()]);
        let report = GetTableStats
            .call(&db, json!({"table_pattern": "ord%"}))
            .await
            .expect("report");

        let executed = db.executed();
        assert_eq!(
            executed[0].1,
            vec![SqlParam::Text("public".into()), SqlParam::Text("ord%".into())]
        );
        assert_eq!(
            executed[1].1,
            vec![SqlParam::Text("public".into()), SqlParam::Text("orders".into())]
        );

        let Report::TableStats(r) = &report else {
            panic!("wrong report");
        };
        let t = &r.tables[0];
        assert_eq!(t.kind, "Table");
        assert_eq!(t.indexes.len(), 1);
        assert!(t.toast_bytes.is_none());
        let activity = t.activity.as_ref().expect("activity");
        assert_eq!(activity.bloat_ratio, Some(30.0));
        assert_eq!(activity.hot_update_ratio, Some(25.0));
        assert_eq!(t.findings[0].severity, Severity::Warning);
        assert_eq!(t.findings[1].severity, Severity::Info);
        assert_eq!(r.high_bloat, vec!["orders".to_string()]);
        assert_eq!(r.needs_analyze, vec!["orders".to_string()]);

        let text = report.render_text();
        assert!(text.contains("Table: public.orders"));
        assert!(text.contains("Tables with high bloat: orders"));
    }

    #[tokio::test]
    async fn test_toast_and_no_indexes() {
        let db = MockExecutor::new().on("reltoastrelid", vec![orders_row()]);
        let report = GetTableStats
            .call(&db, json!({"include_toast": true, "include_indexes": false}))
            .await
            .expect("report");
        assert_eq!(db.calls(), 1);
        let Report::TableStats(r) = report else {
            panic!("wrong report");
        };
        assert_eq!(r.tables[0].toast_bytes, Some(8192));
        assert_eq!(r.tables[0].toast_rows, Some(10));
    }

    #[tokio::test]
    async fn test_no_tables() {
        let db = MockExecutor::new();
        let report = GetTableStats
            .call(&db, json!({"schema": "audit"}))
            .await
            .expect("report");
        assert!(report
            .render_text()
            .contains("No tables found matching pattern '%' in schema 'audit'"));
    }

    #[test]
    fn test_missing_activity() {
        let mut row = Row::new();
        row.insert("live_tuples".into(), Value::Null);
        assert!(activity(&row).is_none());
    }
}
