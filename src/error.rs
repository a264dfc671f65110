//! Error types shared by the driver adapter, the tools and the dispatcher.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::codes;

/// Failures raised by the SQL driver adapter.
///
/// `Connection` and `Statement` are kept apart so a tool can tell an unreachable
/// server from a bad query. Messages are already redacted when constructed by
/// [`crate::db::PgDriver`].
#[derive(Debug, Clone, Error)]
pub enum DbError {
    #[error("database not configured: set DATABASE_URI or pass --db-config")]
    NotConfigured,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Statement(String),

    #[error("query timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("could not decode row: {0}")]
    Decode(String),
}

impl DbError {
    pub fn is_connection(&self) -> bool {
        matches!(self, DbError::Connection(_) | DbError::NotConfigured)
    }

    /// Short class name used in structured results and log fields.
    pub fn class(&self) -> &'static str {
        match self {
            DbError::NotConfigured | DbError::Connection(_) => "connection",
            DbError::Statement(_) => "query",
            DbError::Timeout(_) => "timeout",
            DbError::Decode(_) => "decode",
        }
    }
}

/// Failures surfaced by a `tools/call`.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// JSON-RPC error code for this failure.
    pub fn code(&self) -> i64 {
        match self {
            ToolError::UnknownTool(_) | ToolError::InvalidParams(_) | ToolError::Rejected(_) => {
                codes::INVALID_PARAMS
            }
            ToolError::Database(_) | ToolError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::InvalidParams(err.to_string())
    }
}
