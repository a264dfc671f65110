//! Scripted [`SqlExecutor`] for tests.
//!
//! Responses are matched by substring against the SQL text; the first matching
//! rule wins and unmatched statements return no rows. Every call bumps a counter
//! so tests can assert that nothing reached the database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{Row, SqlExecutor, SqlParam, TextResult};
use crate::error::DbError;

struct Rule {
    needle: String,
    outcome: Result<Vec<Row>, DbError>,
}

pub struct MockExecutor {
    calls: AtomicUsize,
    configured: bool,
    fail_all: Option<DbError>,
    version: String,
    delay: Option<Duration>,
    rules: Vec<Rule>,
    executed: Mutex<Vec<(String, Vec<SqlParam>)>>,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            configured: true,
            fail_all: None,
            version: "PostgreSQL 16.2 (mock)".to_string(),
            delay: None,
            rules: Vec::new(),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// An executor with no database configured.
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    /// Every statement and probe fails with `err`.
    pub fn failing(err: DbError) -> Self {
        Self {
            fail_all: Some(err),
            ..Self::new()
        }
    }

    /// Answer statements containing `needle` with `rows` (each a JSON object).
    pub fn on(mut self, needle: &str, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.rules.push(Rule {
            needle: needle.to_string(),
            outcome: Ok(rows),
        });
        self
    }

    /// Fail statements containing `needle` with `err`.
    pub fn on_error(mut self, needle: &str, err: DbError) -> Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            outcome: Err(err),
        });
        self
    }

    /// Sleep this long before answering anything.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Statements seen so far, with their bound parameters.
    pub fn executed(&self) -> Vec<(String, Vec<SqlParam>)> {
        self.executed.lock().clone()
    }

    async fn answer(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, DbError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().push((sql.to_string(), params.to_vec()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if !self.configured {
            return Err(DbError::NotConfigured);
        }
        if let Some(err) = &self.fail_all {
            return Err(err.clone());
        }
        self.rules
            .iter()
            .find(|rule| sql.contains(&rule.needle))
            .map(|rule| rule.outcome.clone())
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[async_trait]
impl SqlExecutor for MockExecutor {
    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, DbError> {
        self.answer(sql, params).await
    }

    async fn query_text(&self, sql: &str) -> Result<TextResult, DbError> {
        let rows = self.answer(sql, &[]).await?;
        let columns = rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        Ok(TextResult { columns, rows })
    }

    async fn probe(&self, url: Option<&str>) -> Result<String, DbError> {
        let _ = url;
        self.answer("SELECT version()", &[]).await?;
        Ok(self.version.clone())
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_matches_first_rule_and_counts() {
        let mock = MockExecutor::new()
            .on("pg_stat_activity", vec![json!({"count": 3})])
            .on_error("pg_locks", DbError::Statement("boom".into()));

        let rows = mock
            .query("SELECT count(*) FROM pg_stat_activity", &[])
            .await
            .expect("rows");
        assert_eq!(rows[0]["count"], json!(3));

        let err = mock.query("SELECT * FROM pg_locks", &[]).await.unwrap_err();
        assert!(matches!(err, DbError::Statement(_)));

        assert!(mock.query("SELECT 1", &[]).await.expect("rows").is_empty());
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_unconfigured() {
        let mock = MockExecutor::unconfigured();
        assert!(!mock.is_configured());
        assert!(matches!(
            mock.query("SELECT 1", &[]).await,
            Err(DbError::NotConfigured)
        ));
    }
}
