//! Process-wide state, built once in `main` and handed to the transports.

use std::sync::Arc;

use anyhow::Context as _;

use crate::auth::AuthToken;
use crate::config::{Config, TransportKind};
use crate::db::{PgDriver, SqlExecutor};
use crate::dispatcher::Dispatcher;
use crate::redact::Redactor;
use crate::tools::ToolRegistry;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub db: Arc<dyn SqlExecutor>,
    pub registry: Arc<ToolRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    /// Only the HTTP transport checks it.
    pub token: AuthToken,
}

impl AppContext {
    /// Build the context with a lazy deadpool-postgres pool.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let driver = PgDriver::new(
            config.database_url.as_deref(),
            config.pool_size,
            config.query_timeout,
        )
        .context("failed to set up the connection pool")?;
        let redactor = driver.redactor().clone();
        Ok(Self::with_executor(config, Arc::new(driver), redactor))
    }

    /// Build the context around any executor.
    pub fn with_executor(config: Config, db: Arc<dyn SqlExecutor>, redactor: Redactor) -> Self {
        let registry = Arc::new(ToolRegistry::builtin());
        let dispatcher = Arc::new(Dispatcher::new(db.clone(), registry.clone(), redactor));
        let token = match config.transport {
            TransportKind::Http => AuthToken::from_config(config.token.as_deref()),
            // stdio is local; an unused token is not worth a warning
            TransportKind::Stdio => config
                .token
                .as_deref()
                .map(AuthToken::new)
                .unwrap_or_else(AuthToken::generate),
        };

        Self {
            config: Arc::new(config),
            db,
            registry,
            dispatcher,
            token,
        }
    }

    pub async fn shutdown(&self) {
        tracing::info!("closing database pool");
        self.db.close().await;
    }
}
