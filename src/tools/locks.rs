//! Lock contention and session activity.
//!
//! [`GetBlockingQueries`] is in the public catalog. [`ActiveQueries`] backs the
//! `/sse/monitor-queries` stream only and is never registered.

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::JsonObject;
use serde_json::Value;

use super::params::{BlockingQueriesParams, NoParams};
use super::{parse_args, schema_for, truncate, DiagnosticTool};
use crate::db::{Row, RowExt, SqlExecutor, SqlParam};
use crate::error::ToolError;
use crate::report::{
    ActiveQueriesReport, ActiveQuery, BlockingChain, BlockingReport, Report, SessionInfo,
    WaitingLock,
};

const VERSION_SQL: &str = "SELECT version() AS version";

const BLOCKING_TREE_SQL: &str = "
    SELECT
        blocking.pid::int8 AS blocking_pid,
        blocking.usename::text AS blocking_user,
        blocking.application_name AS blocking_app,
        blocking.client_addr::text AS blocking_client,
        blocking.state AS blocking_state,
        blocking.query AS blocking_query,
        EXTRACT(EPOCH FROM (now() - blocking.query_start))::float8 AS blocking_seconds,
        blocked.pid::int8 AS blocked_pid,
        blocked.usename::text AS blocked_user,
        blocked.application_name AS blocked_app,
        blocked.client_addr::text AS blocked_client,
        blocked.state AS blocked_state,
        blocked.query AS blocked_query,
        EXTRACT(EPOCH FROM (now() - blocked.query_start))::float8 AS blocked_seconds
    FROM pg_stat_activity blocked
    JOIN pg_stat_activity blocking
      ON blocking.pid = ANY(pg_blocking_pids(blocked.pid))
    WHERE blocking.pid <> blocked.pid
    ORDER BY blocking_seconds DESC NULLS LAST";

const WAITING_LOCKS_SQL: &str = "
    SELECT
        l.pid::int8 AS pid,
        l.mode AS mode,
        l.locktype AS locktype,
        l.relation::regclass::text AS relation,
        a.usename::text AS user_name,
        a.application_name AS application,
        a.query AS query
    FROM pg_locks l
    JOIN pg_stat_activity a ON a.pid = l.pid
    WHERE NOT l.granted
    ORDER BY a.query_start";

const LONG_RUNNING_SQL: &str = "
    SELECT
        pid::int8 AS pid,
        usename::text AS user_name,
        application_name AS application,
        state,
        EXTRACT(EPOCH FROM (now() - query_start))::float8 AS duration_seconds,
        wait_event_type,
        wait_event,
        query
    FROM pg_stat_activity
    WHERE state <> 'idle'
      AND pid <> pg_backend_pid()
      AND now() - query_start > make_interval(secs => $1::float8 / 1000.0)
    ORDER BY query_start
    LIMIT 10";

const ACTIVE_QUERIES_SQL: &str = "
    SELECT
        pid::int8 AS pid,
        usename::text AS user_name,
        application_name AS application,
        state,
        EXTRACT(EPOCH FROM (now() - query_start))::float8 AS duration_seconds,
        wait_event_type,
        wait_event,
        query
    FROM pg_stat_activity
    WHERE state IS NOT NULL
      AND state <> 'idle'
      AND pid <> pg_backend_pid()
    ORDER BY query_start
    LIMIT 50";

const SHOWN_WAITING_LOCKS: usize = 10;
const QUERY_PREVIEW: usize = 200;

fn session(row: &Row, prefix: &str) -> SessionInfo {
    let col = |name: &str| format!("{prefix}_{name}");
    SessionInfo {
        pid: row.int(&col("pid")),
        user: row.opt_text(&col("user")),
        application: row.opt_text(&col("app")),
        client: row.opt_text(&col("client")),
        state: row.opt_text(&col("state")),
        duration_seconds: row.opt_float(&col("seconds")),
        query: truncate(&row.text(&col("query")), QUERY_PREVIEW),
    }
}

/// Group blocker/blocked pairs by blocker, keeping first-seen order.
fn blocking_chains(rows: &[Row]) -> Vec<BlockingChain> {
    let mut chains: Vec<BlockingChain> = Vec::new();
    for row in rows {
        let blocked = session(row, "blocked");
        let blocker_pid = row.int("blocking_pid");
        match chains.iter_mut().find(|c| c.blocker.pid == blocker_pid) {
            Some(chain) => chain.blocked.push(blocked),
            None => chains.push(BlockingChain {
                blocker: session(row, "blocking"),
                blocked: vec![blocked],
            }),
        }
    }
    chains
}

fn active_query(row: &Row) -> ActiveQuery {
    ActiveQuery {
        pid: row.int("pid"),
        user: row.opt_text("user_name"),
        application: row.opt_text("application"),
        state: row.opt_text("state"),
        duration_seconds: row.opt_float("duration_seconds"),
        wait_event_type: row.opt_text("wait_event_type"),
        wait_event: row.opt_text("wait_event"),
        query: truncate(&row.text("query"), QUERY_PREVIEW),
    }
}

pub struct GetBlockingQueries;

#[async_trait]
impl DiagnosticTool for GetBlockingQueries {
    fn name(&self) -> &'static str {
        "get-blocking-queries"
    }

    fn description(&self) -> &'static str {
        "Detect blocking chains, waiting locks and long-running queries"
    }

    fn input_schema(&self) -> Arc<JsonObject> {
        schema_for::<BlockingQueriesParams>()
    }

    async fn call(&self, db: &dyn SqlExecutor, args: Value) -> Result<Report, ToolError> {
        let params: BlockingQueriesParams = parse_args(args)?;
        if params.min_duration_ms < 0.0 {
            return Err(ToolError::InvalidParams(
                "min_duration_ms must not be negative".to_string(),
            ));
        }

        let version = db
            .query(VERSION_SQL, &[])
            .await?
            .first()
            .map(|r| r.text("version"))
            .unwrap_or_default();
        let server_version = version
            .split(',')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        let chains = blocking_chains(&db.query(BLOCKING_TREE_SQL, &[]).await?);

        let (waiting_locks, waiting_locks_total) = if params.include_locks {
            let rows = db.query(WAITING_LOCKS_SQL, &[]).await?;
            let shown = rows
                .iter()
                .take(SHOWN_WAITING_LOCKS)
                .map(|r| WaitingLock {
                    pid: r.int("pid"),
                    mode: r.text("mode"),
                    locktype: r.text("locktype"),
                    relation: r.opt_text("relation"),
                    user: r.opt_text("user_name"),
                    application: r.opt_text("application"),
                    query: truncate(&r.text("query"), QUERY_PREVIEW),
                })
                .collect();
            (Some(shown), rows.len())
        } else {
            (None, 0)
        };

        let long_running = db
            .query(LONG_RUNNING_SQL, &[SqlParam::from(params.min_duration_ms)])
            .await?
            .iter()
            .map(active_query)
            .collect();

        Ok(Report::Blocking(BlockingReport {
            server_version,
            chains,
            waiting_locks,
            waiting_locks_total,
            min_duration_ms: params.min_duration_ms,
            long_running,
        }))
    }
}

pub struct ActiveQueries;

#[async_trait]
impl DiagnosticTool for ActiveQueries {
    fn name(&self) -> &'static str {
        "active-queries"
    }

    fn description(&self) -> &'static str {
        "Currently running (non-idle) sessions"
    }

    fn input_schema(&self) -> Arc<JsonObject> {
        schema_for::<NoParams>()
    }

    async fn call(&self, db: &dyn SqlExecutor, args: Value) -> Result<Report, ToolError> {
        let _: NoParams = parse_args(args)?;
        let queries: Vec<ActiveQuery> = db
            .query(ACTIVE_QUERIES_SQL, &[])
            .await?
            .iter()
            .map(active_query)
            .collect();
        Ok(Report::ActiveQueries(ActiveQueriesReport {
            count: queries.len(),
            queries,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MockExecutor;
    use serde_json::json;

    fn pair(blocker: i64, blocked: i64) -> Value {
        json!({
            "blocking_pid": blocker, "blocking_user": "app", "blocking_app": "worker",
            "blocking_client": "10.0.0.5/32", "blocking_state": "idle in transaction",
            "blocking_query": "UPDATE accounts SET balance = 0", "blocking_seconds": 120.0,
            "blocked_pid": blocked, "blocked_user": "app", "blocked_app": "",
            "blocked_client": null, "blocked_state": "active",
            "blocked_query": "UPDATE accounts SET balance = 1", "blocked_seconds": 30.0
        })
    }

    #[test]
    fn test_chains_grouped_by_blocker() {
        let rows: Vec<Row> = [pair(10, 11), pair(10, 12), pair(20, 21)]
            .into_iter()
            .map(|v| serde_json::from_value(v).expect("row"))
            .collect();
        let chains = blocking_chains(&rows);
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].blocker.pid, 10);
        assert_eq!(
            chains[0].blocked.iter().map(|s| s.pid).collect::<Vec<_>>(),
            vec![11, 12]
        );
        assert_eq!(chains[1].blocked[0].pid, 21);
    }

    #[tokio::test]
    async fn test_blocking_report() {
        let db = MockExecutor::new()
            .on(
                "version()",
                vec![json!({"version": "PostgreSQL 16.2 on x86_64-pc-linux-gnu, compiled by gcc"})],
            )
            .on("pg_blocking_pids", vec![pair(10, 11)])
            .on(
                "NOT l.granted",
                (0..12)
                    .map(|i| json!({"pid": 100 + i, "mode": "RowExclusiveLock",
                                    "locktype": "relation", "relation": "accounts",
                                    "user_name": "app", "application": "worker",
                                    "query": "UPDATE accounts"}))
                    .collect(),
            );
        let report = GetBlockingQueries
            .call(&db, json!({"min_duration_ms": 250}))
            .await
            .expect("report");
        let Report::Blocking(r) = &report else {
            panic!("wrong report");
        };
        assert_eq!(r.server_version, "PostgreSQL 16.2 on x86_64-pc-linux-gnu");
        assert_eq!(r.chains.len(), 1);
        assert_eq!(r.waiting_locks.as_ref().map(Vec::len), Some(10));
        assert_eq!(r.waiting_locks_total, 12);

        let (_, params) = db.executed().pop().expect("long-running query");
        assert_eq!(params, vec![SqlParam::Float(250.0)]);

        let text = report.render_text();
        assert!(text.contains("SELECT pg_cancel_backend(10);"));
        assert!(text.contains("... and 2 more waiting locks"));
        assert!(text.contains("Application: Unknown"));
    }

    #[tokio::test]
    async fn test_locks_skipped_when_not_requested() {
        let db = MockExecutor::new();
        let report = GetBlockingQueries
            .call(&db, json!({"include_locks": false}))
            .await
            .expect("report");
        assert!(db
            .executed()
            .iter()
            .all(|(sql, _)| !sql.contains("pg_locks")));
        assert!(report.render_text().contains("[OK] No blocking queries detected"));
        assert!(report.to_json()["waiting_locks"].is_null());
    }

    #[tokio::test]
    async fn test_active_queries() {
        let db = MockExecutor::new().on(
            "LIMIT 50",
            vec![json!({"pid": 7, "user_name": "app", "application": "psql",
                        "state": "active", "duration_seconds": 1.5,
                        "wait_event_type": "Lock", "wait_event": "relation",
                        "query": "SELECT 1"})],
        );
        let report = ActiveQueries.call(&db, Value::Null).await.expect("report");
        let Report::ActiveQueries(r) = &report else {
            panic!("wrong report");
        };
        assert_eq!(r.count, 1);
        assert!(report.render_text().contains("Waiting on: Lock/relation"));
    }
}
