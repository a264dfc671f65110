//! SQL driver adapter.
//!
//! [`SqlExecutor`] is the seam between the diagnostic tools and PostgreSQL.
//! [`PgDriver`] implements it on a deadpool-postgres pool; `mock::MockExecutor`
//! implements it for tests without a server; it is only built for unit tests or
//! with the `test-util` feature.

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Pool, PoolConfig, Runtime};
use serde_json::{json, Map, Value};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{NoTls, SimpleQueryMessage};

use crate::error::DbError;
use crate::redact::Redactor;

/// One result row: column name to value, in select-list order. NULL is `Value::Null`.
pub type Row = Map<String, Value>;

/// A value bound through the driver's parameter mechanism.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl SqlParam {
    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlParam::Text(v) => v,
            SqlParam::Int(v) => v,
            SqlParam::Float(v) => v,
            SqlParam::Bool(v) => v,
        }
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Float(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Bool(v)
    }
}

/// Output of a simple-protocol statement: every value is text or NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run a fixed statement with bound parameters.
    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, DbError>;

    /// Run caller-supplied SQL over the simple query protocol. With several
    /// statements the last result set wins.
    async fn query_text(&self, sql: &str) -> Result<TextResult, DbError>;

    /// Check connectivity and return `version()`. An explicit URL opens a one-off
    /// connection instead of using the pool.
    async fn probe(&self, url: Option<&str>) -> Result<String, DbError>;

    fn is_configured(&self) -> bool;

    async fn close(&self);
}

/// Quote an identifier for inclusion in SQL text.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

// ============================================================================
// PostgreSQL driver
// ============================================================================

/// Pooled PostgreSQL executor. The pool connects lazily, on first use.
pub struct PgDriver {
    pool: Option<Pool>,
    timeout: Duration,
    redactor: Redactor,
}

impl PgDriver {
    pub fn new(
        database_url: Option<&str>,
        pool_size: usize,
        timeout: Duration,
    ) -> Result<Self, DbError> {
        let redactor = Redactor::for_connection_string(database_url);
        let pool = match database_url {
            Some(url) => {
                let mut cfg = deadpool_postgres::Config::new();
                cfg.url = Some(url.to_string());
                let mut pool_cfg = PoolConfig::new(pool_size);
                pool_cfg.timeouts.wait = Some(timeout);
                pool_cfg.timeouts.create = Some(timeout);
                pool_cfg.timeouts.recycle = Some(timeout);
                cfg.pool = Some(pool_cfg);
                let pool = cfg
                    .create_pool(Some(Runtime::Tokio1), NoTls)
                    .map_err(|e| DbError::Connection(redactor.redact(&e.to_string())))?;
                Some(pool)
            }
            None => None,
        };
        Ok(Self {
            pool,
            timeout,
            redactor,
        })
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    fn pool(&self) -> Result<&Pool, DbError> {
        self.pool.as_ref().ok_or(DbError::NotConfigured)
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, DbError>
    where
        F: Future<Output = Result<T, DbError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| DbError::Timeout(self.timeout))?
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, DbError> {
        // Any failure to obtain a connection, auth included, is a connection failure.
        self.pool()?
            .get()
            .await
            .map_err(|e| DbError::Connection(self.redactor.redact(&e.to_string())))
    }

    fn classify(&self, err: tokio_postgres::Error) -> DbError {
        match err.as_db_error() {
            Some(db) => DbError::Statement(self.redactor.redact(&db.to_string())),
            None => DbError::Connection(self.redactor.redact(&err.to_string())),
        }
    }
}

#[async_trait]
impl SqlExecutor for PgDriver {
    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, DbError> {
        self.bounded(async {
            let client = self.client().await?;
            let bound: Vec<&(dyn ToSql + Sync)> = params.iter().map(SqlParam::as_sql).collect();
            let rows = client
                .query(sql, &bound)
                .await
                .map_err(|e| self.classify(e))?;
            rows.iter().map(row_to_json).collect()
        })
        .await
    }

    async fn query_text(&self, sql: &str) -> Result<TextResult, DbError> {
        self.bounded(async {
            let client = self.client().await?;
            let messages = client
                .simple_query(sql)
                .await
                .map_err(|e| self.classify(e))?;
            Ok(collect_simple(messages))
        })
        .await
    }

    async fn probe(&self, url: Option<&str>) -> Result<String, DbError> {
        match url {
            Some(url) => {
                let redactor = self.redactor.clone().with_connection_string(url);
                self.bounded(async move {
                    let (client, connection) = tokio_postgres::connect(url, NoTls)
                        .await
                        .map_err(|e| DbError::Connection(redactor.redact(&e.to_string())))?;

                    tokio::spawn(async move {
                        if let Err(e) = connection.await {
                            tracing::debug!("probe connection closed: {}", e);
                        }
                    });

                    let row = client
                        .query_one("SELECT version()", &[])
                        .await
                        .map_err(|e| DbError::Statement(redactor.redact(&e.to_string())))?;
                    row.try_get::<_, String>(0)
                        .map_err(|e| DbError::Decode(e.to_string()))
                })
                .await
            }
            None => {
                let rows = self.query("SELECT version() AS version", &[]).await?;
                rows.first()
                    .and_then(|r| r.get("version"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| DbError::Decode("version() returned no row".to_string()))
            }
        }
    }

    fn is_configured(&self) -> bool {
        self.pool.is_some()
    }

    async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close();
            tracing::info!("Database pool closed");
        }
    }
}

fn collect_simple(messages: Vec<SimpleQueryMessage>) -> TextResult {
    let mut result = TextResult::default();
    for message in messages {
        match message {
            SimpleQueryMessage::RowDescription(columns) => {
                result = TextResult {
                    columns: columns.iter().map(|c| c.name().to_string()).collect(),
                    rows: Vec::new(),
                };
            }
            SimpleQueryMessage::Row(row) => {
                let mut map = Map::new();
                for (idx, column) in row.columns().iter().enumerate() {
                    let value = row
                        .get(idx)
                        .map(|v| Value::String(v.to_string()))
                        .unwrap_or(Value::Null);
                    map.insert(column.name().to_string(), value);
                }
                result.rows.push(map);
            }
            _ => {}
        }
    }
    result
}

fn decode<'a, T, F>(row: &'a tokio_postgres::Row, idx: usize, f: F) -> Result<Value, DbError>
where
    T: tokio_postgres::types::FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    row.try_get::<_, Option<T>>(idx)
        .map(|v| v.map(f).unwrap_or(Value::Null))
        .map_err(|e| DbError::Decode(format!("column {}: {}", row.columns()[idx].name(), e)))
}

/// Convert a driver row into an ordered JSON map.
pub(crate) fn row_to_json(row: &tokio_postgres::Row) -> Result<Row, DbError> {
    let mut map = Map::new();

    for (idx, column) in row.columns().iter().enumerate() {
        let value = match *column.type_() {
            Type::BOOL => decode::<bool, _>(row, idx, |v| json!(v))?,
            Type::INT2 => decode::<i16, _>(row, idx, |v| json!(v))?,
            Type::INT4 => decode::<i32, _>(row, idx, |v| json!(v))?,
            Type::INT8 => decode::<i64, _>(row, idx, |v| json!(v))?,
            Type::OID => decode::<u32, _>(row, idx, |v| json!(v))?,
            Type::FLOAT4 => decode::<f32, _>(row, idx, |v| json!(v))?,
            Type::FLOAT8 => decode::<f64, _>(row, idx, |v| json!(v))?,
            Type::TEXT | Type::VARCHAR | Type::NAME | Type::BPCHAR | Type::UNKNOWN => {
                decode::<String, _>(row, idx, Value::String)?
            }
            Type::JSON | Type::JSONB => decode::<Value, _>(row, idx, |v| v)?,
            Type::TIMESTAMPTZ => {
                decode::<chrono::DateTime<chrono::Utc>, _>(row, idx, |v| json!(v.to_rfc3339()))?
            }
            Type::TIMESTAMP => {
                decode::<chrono::NaiveDateTime, _>(row, idx, |v| json!(v.to_string()))?
            }
            Type::DATE => decode::<chrono::NaiveDate, _>(row, idx, |v| json!(v.to_string()))?,
            Type::TEXT_ARRAY | Type::NAME_ARRAY => {
                decode::<Vec<String>, _>(row, idx, |v| json!(v))?
            }
            _ => row
                .try_get::<_, Option<String>>(idx)
                .ok()
                .flatten()
                .map(Value::String)
                .unwrap_or(Value::Null),
        };

        map.insert(column.name().to_string(), value);
    }

    Ok(map)
}

// ============================================================================
// Row accessors used by the tools
// ============================================================================

/// Typed, lenient reads from a [`Row`]. Missing columns and NULL read as the default.
pub trait RowExt {
    fn text(&self, col: &str) -> String;
    fn opt_text(&self, col: &str) -> Option<String>;
    fn int(&self, col: &str) -> i64;
    fn float(&self, col: &str) -> f64;
    fn opt_float(&self, col: &str) -> Option<f64>;
    fn flag(&self, col: &str) -> bool;
}

impl RowExt for Row {
    fn text(&self, col: &str) -> String {
        self.opt_text(col).unwrap_or_default()
    }

    fn opt_text(&self, col: &str) -> Option<String> {
        match self.get(col)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn int(&self, col: &str) -> i64 {
        match self.get(col) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or_default(),
            Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
            _ => 0,
        }
    }

    fn float(&self, col: &str) -> f64 {
        self.opt_float(col).unwrap_or_default()
    }

    fn opt_float(&self, col: &str) -> Option<f64> {
        match self.get(col)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn flag(&self, col: &str) -> bool {
        match self.get(col) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.as_str(), "t" | "true"),
            _ => false,
        }
    }
}
