use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::JsonObject;
use serde_json::Value;

use super::params::TestConnectionParams;
use super::{parse_args, schema_for, DiagnosticTool};
use crate::db::SqlExecutor;
use crate::error::{DbError, ToolError};
use crate::redact::sanitize_connection_string;
use crate::report::{ConnectionReport, Report};

/// `test-connection`: a failed connection is reported, not raised.
pub struct TestConnection;

#[async_trait]
impl DiagnosticTool for TestConnection {
    fn name(&self) -> &'static str {
        "test-connection"
    }

    fn description(&self) -> &'static str {
        "Test the connection to the PostgreSQL database"
    }

    fn input_schema(&self) -> Arc<JsonObject> {
        schema_for::<TestConnectionParams>()
    }

    async fn call(&self, db: &dyn SqlExecutor, args: Value) -> Result<Report, ToolError> {
        let params: TestConnectionParams = parse_args(args)?;
        let url = params
            .database_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());

        let source = if url.is_some() { "parameter" } else { "environment" };
        let database_url = url.map(sanitize_connection_string);

        let outcome = if url.is_none() && !db.is_configured() {
            Err(DbError::NotConfigured)
        } else {
            db.probe(url).await
        };

        let report = match outcome {
            Ok(version) => ConnectionReport {
                connected: true,
                version: Some(version),
                database_url,
                source: source.to_string(),
                error: None,
                error_class: None,
            },
            Err(err) => {
                tracing::info!(class = err.class(), "test-connection failed: {}", err);
                ConnectionReport {
                    connected: false,
                    version: None,
                    database_url,
                    source: source.to_string(),
                    error: Some(err.to_string()),
                    error_class: Some(err.class().to_string()),
                }
            }
        };
        Ok(Report::Connection(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MockExecutor;
    use serde_json::json;

    #[tokio::test]
    async fn test_connected() {
        let db = MockExecutor::new();
        let report = TestConnection.call(&db, json!({})).await.expect("report");
        let Report::Connection(r) = report else {
            panic!("wrong report");
        };
        assert!(r.connected);
        assert_eq!(r.source, "environment");
        assert!(r.version.expect("version").starts_with("PostgreSQL"));
    }

    #[tokio::test]
    async fn test_failure_is_a_result() {
        let db = MockExecutor::failing(DbError::Connection("connection refused".into()));
        let report = TestConnection
            .call(
                &db,
                json!({"database_url": "postgresql://u:secretpw@db:5432/x"}),
            )
            .await
            .expect("report");
        let json = report.to_json();
        assert_eq!(json["connected"], json!(false));
        assert_eq!(json["error_class"], json!("connection"));
        assert_eq!(json["database_url"], json!("postgresql://u:***@db:5432/x"));
        assert!(!report.render_text().contains("secretpw"));
    }

    #[tokio::test]
    async fn test_unconfigured_without_url() {
        let db = MockExecutor::unconfigured();
        let report = TestConnection.call(&db, json!({})).await.expect("report");
        assert_eq!(report.to_json()["connected"], json!(false));
        assert_eq!(db.calls(), 0);
    }
}
