//! Runtime configuration and its command-line / environment surface.

use std::time::Duration;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// Newline-delimited JSON-RPC on stdin/stdout.
    Stdio,
    /// HTTP POST plus SSE streams.
    Http,
}

#[derive(Debug, Parser)]
#[command(
    name = "pg-diag-mcp",
    version,
    about = "PostgreSQL diagnostics MCP server"
)]
pub struct Cli {
    /// PostgreSQL connection string, URI or key/value form.
    #[arg(long = "db-config", env = "DATABASE_URI")]
    pub db_config: Option<String>,

    /// Bearer token required by the HTTP and SSE endpoints. Generated when absent.
    #[arg(long, env = "POSTGRES_MCP_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[arg(long, value_enum, default_value_t = TransportKind::Stdio)]
    pub transport: TransportKind,

    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, default_value_t = 8000)]
    pub port: u16,

    /// Upper bound for any single statement, in seconds.
    #[arg(long, default_value_t = 30)]
    pub query_timeout_secs: u64,

    /// Maximum number of pooled connections.
    #[arg(long, default_value_t = 8)]
    pub pool_size: usize,
}

/// Everything the library needs to build an [`crate::AppContext`].
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub token: Option<String>,
    pub transport: TransportKind,
    pub host: String,
    pub port: u16,
    pub query_timeout: Duration,
    pub pool_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            token: None,
            transport: TransportKind::Stdio,
            host: "0.0.0.0".to_string(),
            port: 8000,
            query_timeout: Duration::from_secs(30),
            pool_size: 8,
        }
    }
}

impl Config {
    /// Host and port for the HTTP listener. The host may be a name such as `localhost`.
    pub fn listen_addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Self {
            // An empty env var means "not configured".
            database_url: cli.db_config.filter(|s| !s.trim().is_empty()),
            token: cli.token.filter(|s| !s.is_empty()),
            transport: cli.transport,
            host: cli.host,
            port: cli.port,
            query_timeout: Duration::from_secs(cli.query_timeout_secs.max(1)),
            pool_size: cli.pool_size.max(1),
        }
    }
}
