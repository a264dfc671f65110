use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::JsonObject;
use serde_json::Value;

use super::params::{ListTablesParams, NoParams};
use super::{parse_args, schema_for, DiagnosticTool};
use crate::db::{RowExt, SqlExecutor, SqlParam};
use crate::error::ToolError;
use crate::report::{Report, SchemaEntry, SchemaListing, TableEntry, TableListing};

const LIST_SCHEMAS_SQL: &str = "
    SELECT
        schema_name::text AS schema_name,
        schema_owner::text AS schema_owner,
        CASE
            WHEN schema_name LIKE 'pg_%' THEN 'System Schema'
            WHEN schema_name = 'information_schema' THEN 'System Information Schema'
            ELSE 'User Schema'
        END AS schema_type
    FROM information_schema.schemata
    ORDER BY schema_type, schema_name";

const LIST_TABLES_SQL: &str = "
    SELECT
        c.relname AS table_name,
        pg_size_pretty(pg_total_relation_size(c.oid)) AS size,
        (SELECT count(*) FROM pg_attribute a
          WHERE a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped) AS columns
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind IN ('r', 'p')
      AND n.nspname = $1::text
    ORDER BY c.relname";

pub struct ListSchemas;

#[async_trait]
impl DiagnosticTool for ListSchemas {
    fn name(&self) -> &'static str {
        "list-schemas"
    }

    fn description(&self) -> &'static str {
        "List all schemas in the database, grouped by type"
    }

    fn input_schema(&self) -> Arc<JsonObject> {
        schema_for::<NoParams>()
    }

    async fn call(&self, db: &dyn SqlExecutor, args: Value) -> Result<Report, ToolError> {
        let _: NoParams = parse_args(args)?;
        let rows = db.query(LIST_SCHEMAS_SQL, &[]).await?;
        let schemas = rows
            .iter()
            .map(|r| SchemaEntry {
                name: r.text("schema_name"),
                owner: r.text("schema_owner"),
                kind: r.text("schema_type"),
            })
            .collect();
        Ok(Report::Schemas(SchemaListing { schemas }))
    }
}

pub struct ListTables;

#[async_trait]
impl DiagnosticTool for ListTables {
    fn name(&self) -> &'static str {
        "list-tables"
    }

    fn description(&self) -> &'static str {
        "List tables in a schema with their size and column count"
    }

    fn input_schema(&self) -> Arc<JsonObject> {
        schema_for::<ListTablesParams>()
    }

    async fn call(&self, db: &dyn SqlExecutor, args: Value) -> Result<Report, ToolError> {
        let params: ListTablesParams = parse_args(args)?;
        let rows = db
            .query(LIST_TABLES_SQL, &[SqlParam::from(params.schema.as_str())])
            .await?;
        let tables = rows
            .iter()
            .map(|r| TableEntry {
                name: r.text("table_name"),
                size: r.text("size"),
                columns: r.int("columns"),
            })
            .collect();
        Ok(Report::Tables(TableListing {
            schema: params.schema,
            tables,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MockExecutor;
    use serde_json::json;

    #[tokio::test]
    async fn test_list_tables_binds_schema() {
        let db = MockExecutor::new().on(
            "pg_class",
            vec![json!({"table_name": "orders", "size": "16 kB", "columns": 4})],
        );
        let report = ListTables
            .call(&db, json!({"schema": "sales'; DROP TABLE x; --"}))
            .await
            .expect("report");

        let (sql, params) = db.executed().remove(0);
        assert!(!sql.contains("DROP"));
        assert_eq!(
            params,
            vec![SqlParam::Text("sales'; DROP TABLE x; --".into())]
        );
        assert!(report.render_text().contains("orders (4 columns, 16 kB)"));
    }

    #[tokio::test]
    async fn test_list_schemas_empty() {
        let db = MockExecutor::new();
        let report = ListSchemas.call(&db, json!({})).await.expect("report");
        assert_eq!(report.render_text(), "No schemas found.");
    }
}
