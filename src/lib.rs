//! PostgreSQL Diagnostics MCP Server
//!
//! A Model Context Protocol (MCP) server that answers diagnostic questions about a
//! PostgreSQL database: connectivity, catalog listings, read-only queries, query
//! plans, slow queries, index suggestions, table and index statistics, lock
//! contention and an overall health score.
//!
//! Requests arrive as JSON-RPC 2.0 over stdio (one message per line) or over
//! HTTP, with server-sent event streams for live monitors.
//!
//! # Example
//!
//! ```no_run
//! use pg_diag_mcp::{AppContext, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config {
//!         database_url: Some("postgresql://postgres@localhost/mydb".into()),
//!         ..Config::default()
//!     };
//!     let ctx = AppContext::new(config)?;
//!     pg_diag_mcp::transport::run(ctx.clone()).await?;
//!     ctx.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod redact;
pub mod report;
pub mod tools;
pub mod transport;

pub use auth::AuthToken;
pub use config::{Cli, Config, TransportKind};
pub use context::AppContext;
pub use db::{PgDriver, SqlExecutor};
pub use dispatcher::Dispatcher;
pub use error::{DbError, ToolError};
pub use redact::{sanitize_connection_string, Redactor};
pub use report::Report;
pub use tools::{DiagnosticTool, ToolRegistry};
