//! `health-check`: one pass over the server-wide statistics views, folded into
//! a 0..100 score.

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::JsonObject;
use serde_json::Value;

use super::params::NoParams;
use super::{parse_args, schema_for, truncate, DiagnosticTool};
use crate::db::{Row, RowExt, SqlExecutor};
use crate::error::ToolError;
use crate::report::{
    BloatCandidate, ConnectionStats, HealthReport, HealthStatus, LongQuery, ReplicationInfo,
    Report, SizedTable, VacuumCandidate,
};

const CONNECTIONS_SQL: &str = "
    SELECT
        count(*) FILTER (WHERE state = 'active')::int8 AS active,
        count(*) FILTER (WHERE state = 'idle')::int8 AS idle,
        count(*) FILTER (WHERE state = 'idle in transaction')::int8 AS idle_in_transaction,
        count(*) FILTER (WHERE wait_event IS NOT NULL)::int8 AS waiting,
        count(*)::int8 AS total,
        (SELECT setting::int8 FROM pg_settings WHERE name = 'max_connections') AS max_connections
    FROM pg_stat_activity
    WHERE pid <> pg_backend_pid()";

const DATABASE_SIZE_SQL: &str =
    "SELECT pg_database_size(current_database())::int8 AS db_size";

const LARGEST_TABLES_SQL: &str = "
    SELECT
        (n.nspname || '.' || c.relname)::text AS table_name,
        pg_total_relation_size(c.oid)::int8 AS bytes
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind IN ('r', 'p')
      AND n.nspname NOT IN ('pg_catalog', 'information_schema')
      AND n.nspname NOT LIKE 'pg_toast%'
    ORDER BY pg_total_relation_size(c.oid) DESC
    LIMIT 5";

const CACHE_HIT_SQL: &str = "
    SELECT (sum(blks_hit)::float8 / NULLIF(sum(blks_hit + blks_read), 0) * 100)::float8 AS cache_hit_ratio
    FROM pg_stat_database
    WHERE datname = current_database()";

const VACUUM_SQL: &str = "
    SELECT
        schemaname::text AS schema_name,
        relname::text AS table_name,
        n_dead_tup::int8 AS dead_tuples,
        n_live_tup::int8 AS live_tuples,
        CASE WHEN n_live_tup > 0
             THEN round((n_dead_tup::numeric / n_live_tup) * 100, 2)::float8
             ELSE 0::float8
        END AS dead_ratio
    FROM pg_stat_user_tables
    WHERE n_dead_tup > 1000
    ORDER BY n_dead_tup DESC
    LIMIT 5";

const REPLICATION_SQL: &str = "
    SELECT
        count(*)::int8 AS replicas,
        EXTRACT(EPOCH FROM max(replay_lag))::float8 AS max_lag_seconds
    FROM pg_stat_replication";

const LONG_RUNNING_SQL: &str = "
    SELECT
        pid::int8 AS pid,
        EXTRACT(EPOCH FROM (now() - query_start))::float8 AS duration_seconds,
        query
    FROM pg_stat_activity
    WHERE now() - query_start > interval '5 minutes'
      AND state = 'active'
      AND pid <> pg_backend_pid()
    ORDER BY duration_seconds DESC
    LIMIT 3";

const BLOAT_SQL: &str = "
    SELECT
        (n.nspname || '.' || c.relname)::text AS table_name,
        pg_relation_size(c.oid)::int8 AS table_bytes,
        round(100.0 * pg_relation_size(c.oid) / NULLIF(pg_total_relation_size(c.oid), 0))::float8 AS table_ratio
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind IN ('r', 'p')
      AND n.nspname NOT IN ('pg_catalog', 'information_schema')
      AND pg_relation_size(c.oid) > 10485760
    ORDER BY table_ratio ASC
    LIMIT 5";

pub struct HealthCheck;

#[async_trait]
impl DiagnosticTool for HealthCheck {
    fn name(&self) -> &'static str {
        "health-check"
    }

    fn description(&self) -> &'static str {
        "Comprehensive database health check: connections, cache, vacuum, replication, bloat"
    }

    fn input_schema(&self) -> Arc<JsonObject> {
        schema_for::<NoParams>()
    }

    async fn call(&self, db: &dyn SqlExecutor, args: Value) -> Result<Report, ToolError> {
        let _: NoParams = parse_args(args)?;

        let conn = first(db.query(CONNECTIONS_SQL, &[]).await?);
        let total = conn.int("total");
        let max = conn.int("max_connections");
        let connections = ConnectionStats {
            active: conn.int("active"),
            idle: conn.int("idle"),
            idle_in_transaction: conn.int("idle_in_transaction"),
            waiting: conn.int("waiting"),
            total,
            max,
            usage_percent: if max > 0 {
                total as f64 * 100.0 / max as f64
            } else {
                0.0
            },
        };

        let database_size = first(db.query(DATABASE_SIZE_SQL, &[]).await?).int("db_size");

        let largest_tables = db
            .query(LARGEST_TABLES_SQL, &[])
            .await?
            .iter()
            .map(|r| SizedTable {
                name: r.text("table_name"),
                bytes: r.int("bytes"),
            })
            .collect();

        let cache_hit_ratio = first(db.query(CACHE_HIT_SQL, &[]).await?)
            .opt_float("cache_hit_ratio")
            .unwrap_or(0.0);

        let vacuum: Vec<VacuumCandidate> = db
            .query(VACUUM_SQL, &[])
            .await?
            .iter()
            .map(|r| VacuumCandidate {
                schema: r.text("schema_name"),
                table: r.text("table_name"),
                dead_tuples: r.int("dead_tuples"),
                live_tuples: r.int("live_tuples"),
                dead_ratio: r.float("dead_ratio"),
            })
            .collect();

        let repl = first(db.query(REPLICATION_SQL, &[]).await?);
        let replication = ReplicationInfo {
            replicas: repl.int("replicas"),
            max_lag_seconds: repl.opt_float("max_lag_seconds"),
        };

        let long_running: Vec<LongQuery> = db
            .query(LONG_RUNNING_SQL, &[])
            .await?
            .iter()
            .map(|r| LongQuery {
                pid: r.int("pid"),
                duration_seconds: r.float("duration_seconds"),
                query: truncate(&r.text("query"), 100),
            })
            .collect();

        let bloat_candidates = db
            .query(BLOAT_SQL, &[])
            .await?
            .iter()
            .filter_map(|r| {
                let ratio = r.opt_float("table_ratio")?;
                (ratio > 0.0 && ratio < 50.0).then(|| BloatCandidate {
                    table: r.text("table_name"),
                    table_bytes: r.int("table_bytes"),
                    table_ratio: ratio,
                })
            })
            .collect();

        let (score, issues) = score(&connections, cache_hit_ratio, &long_running, &vacuum);

        Ok(Report::Health(HealthReport {
            status: HealthStatus::from_score(score),
            score,
            connections,
            database_size,
            largest_tables,
            cache_hit_ratio,
            vacuum,
            replication,
            long_running,
            bloat_candidates,
            issues,
        }))
    }
}

fn first(rows: Vec<Row>) -> Row {
    rows.into_iter().next().unwrap_or_default()
}

fn score(
    connections: &ConnectionStats,
    cache_hit_ratio: f64,
    long_running: &[LongQuery],
    vacuum: &[VacuumCandidate],
) -> (i64, Vec<String>) {
    let mut score = 100;
    let mut issues = Vec::new();

    if connections.usage_percent > 80.0 {
        score -= 10;
        issues.push("High connection usage".to_string());
    }
    if cache_hit_ratio < 90.0 {
        score -= 20;
        issues.push("Low cache hit ratio".to_string());
    }
    if connections.idle_in_transaction > 5 {
        score -= 10;
        issues.push("Many idle transactions".to_string());
    }
    if !long_running.is_empty() {
        score -= 10;
        issues.push("Long running queries detected".to_string());
    }
    if !vacuum.is_empty() {
        score -= 5;
        issues.push("Tables need vacuum".to_string());
    }
    (score, issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MockExecutor;
    use serde_json::json;

    fn healthy() -> MockExecutor {
        MockExecutor::new()
            .on(
                "max_connections",
                vec![json!({"active": 2, "idle": 5, "idle_in_transaction": 0,
                            "waiting": 0, "total": 7, "max_connections": 100})],
            )
            .on("pg_database_size", vec![json!({"db_size": 10485760})])
            .on("blks_hit", vec![json!({"cache_hit_ratio": 99.5})])
            .on("pg_stat_replication", vec![json!({"replicas": 0, "max_lag_seconds": null})])
    }

    #[tokio::test]
    async fn test_healthy_database() {
        let report = HealthCheck.call(&healthy(), json!({})).await.expect("report");
        let Report::Health(r) = &report else {
            panic!("wrong report");
        };
        assert_eq!(r.score, 100);
        assert_eq!(r.status, HealthStatus::Excellent);
        assert!(r.issues.is_empty());
        assert_eq!(r.connections.usage_percent, 7.0);

        let text = report.render_text();
        assert!(text.contains("Current size: 10.00 MB"));
        assert!(text.contains("Health Score: 100/100 EXCELLENT"));
    }

    #[tokio::test]
    async fn test_degraded_database() {
        let db = MockExecutor::new()
            .on(
                "max_connections",
                vec![json!({"active": 50, "idle": 20, "idle_in_transaction": 15,
                            "waiting": 3, "total": 90, "max_connections": 100})],
            )
            .on("blks_hit", vec![json!({"cache_hit_ratio": 72.0})])
            .on("n_dead_tup > 1000", vec![json!({"schema_name": "public", "table_name": "events",
                "dead_tuples": 50000, "live_tuples": 100000, "dead_ratio": 50.0})])
            .on("interval '5 minutes'", vec![json!({"pid": 42, "duration_seconds": 900.0,
                "query": "SELECT pg_sleep(1000)"})]);
        let report = HealthCheck.call(&db, json!({})).await.expect("report");
        let Report::Health(r) = report else {
            panic!("wrong report");
        };
        assert_eq!(r.score, 45);
        assert_eq!(r.status, HealthStatus::Poor);
        assert_eq!(
            r.issues,
            vec![
                "High connection usage",
                "Low cache hit ratio",
                "Many idle transactions",
                "Long running queries detected",
                "Tables need vacuum",
            ]
        );
    }

    #[tokio::test]
    async fn test_bloat_candidates_filtered() {
        let db = healthy().on(
            "10485760",
            vec![
                json!({"table_name": "public.a", "table_bytes": 20971520, "table_ratio": 30.0}),
                json!({"table_name": "public.b", "table_bytes": 20971520, "table_ratio": 80.0}),
            ],
        );
        let report = HealthCheck.call(&db, json!({})).await.expect("report");
        let Report::Health(r) = report else {
            panic!("wrong report");
        };
        assert_eq!(r.bloat_candidates.len(), 1);
        assert_eq!(r.bloat_candidates[0].table, "public.a");
    }

    #[tokio::test]
    async fn test_statement_failure_propagates() {
        let db = MockExecutor::failing(crate::error::DbError::Statement("boom".into()));
        let err = HealthCheck.call(&db, json!({})).await.unwrap_err();
        assert_eq!(err.code(), -32603);
    }
}
