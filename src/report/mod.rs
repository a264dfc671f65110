//! Structured tool results.
//!
//! Tools return a [`Report`]; transports that need prose call
//! [`Report::render_text`], and JSON consumers get the serialized report as
//! `structuredContent`.

mod render;

use serde::Serialize;
use serde_json::Value;

use crate::db::Row;

pub use render::format_bytes;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Report {
    Connection(ConnectionReport),
    Schemas(SchemaListing),
    Tables(TableListing),
    Query(QueryOutput),
    Plan(PlanReport),
    SlowQueries(SlowQueryReport),
    Health(HealthReport),
    IndexSuggestions(IndexSuggestionReport),
    TableStats(TableStatsReport),
    IndexUsage(IndexUsageReport),
    Blocking(BlockingReport),
    ActiveQueries(ActiveQueriesReport),
}

impl Report {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Good,
    Info,
    Warning,
}

/// One observation produced by a heuristic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

impl Finding {
    pub fn good(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Good,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

// ============================================================================
// Connection and catalog
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub connected: bool,
    pub version: Option<String>,
    /// Redacted.
    pub database_url: Option<String>,
    /// `parameter` or `environment`.
    pub source: String,
    pub error: Option<String>,
    pub error_class: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaEntry {
    pub name: String,
    pub owner: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaListing {
    pub schemas: Vec<SchemaEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableEntry {
    pub name: String,
    pub size: String,
    pub columns: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableListing {
    pub schema: String,
    pub tables: Vec<TableEntry>,
}

// ============================================================================
// Queries and plans
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanTiming {
    pub planning_ms: f64,
    pub execution_ms: f64,
    pub total_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub format: String,
    pub analyze: bool,
    pub buffers: bool,
    /// Plan lines for the text format.
    pub plan_lines: Vec<String>,
    /// The plan document for json/xml/yaml.
    pub document: Option<Value>,
    pub timing: Option<PlanTiming>,
    pub findings: Vec<Finding>,
    pub tips: Vec<String>,
}

// ============================================================================
// Workload
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SlowQuery {
    pub query: String,
    pub calls: i64,
    pub total_ms: f64,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub stddev_ms: f64,
    pub rows: i64,
    pub rows_per_call: f64,
    pub cache_hit_percent: f64,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlowQueryReport {
    pub extension_available: bool,
    pub threshold_ms: f64,
    pub limit: i64,
    pub queries: Vec<SlowQuery>,
    pub enable_steps: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionMode {
    Workload,
    Structural,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkloadQuery {
    pub query: String,
    pub calls: i64,
    pub mean_ms: f64,
    pub total_ms: f64,
    /// `table.column` pairs filtered on without a matching index.
    pub missing_indexes: Vec<String>,
    pub notes: Vec<Finding>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnindexedForeignKey {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub references: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexSuggestionReport {
    pub mode: SuggestionMode,
    pub min_calls: i64,
    pub min_duration_ms: f64,
    pub queries: Vec<WorkloadQuery>,
    pub recommended_indexes: Vec<String>,
    pub tables_without_pk: Vec<String>,
    pub unindexed_foreign_keys: Vec<UnindexedForeignKey>,
    pub enable_steps: Vec<String>,
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub active: i64,
    pub idle: i64,
    pub idle_in_transaction: i64,
    pub waiting: i64,
    pub total: i64,
    pub max: i64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SizedTable {
    pub name: String,
    pub bytes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VacuumCandidate {
    pub schema: String,
    pub table: String,
    pub dead_tuples: i64,
    pub live_tuples: i64,
    pub dead_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplicationInfo {
    pub replicas: i64,
    pub max_lag_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LongQuery {
    pub pid: i64,
    pub duration_seconds: f64,
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BloatCandidate {
    pub table: String,
    pub table_bytes: i64,
    pub table_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Excellent,
    Good,
    Poor,
}

impl HealthStatus {
    pub fn from_score(score: i64) -> Self {
        if score >= 90 {
            HealthStatus::Excellent
        } else if score >= 70 {
            HealthStatus::Good
        } else {
            HealthStatus::Poor
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub score: i64,
    pub connections: ConnectionStats,
    pub database_size: i64,
    pub largest_tables: Vec<SizedTable>,
    pub cache_hit_ratio: f64,
    pub vacuum: Vec<VacuumCandidate>,
    pub replication: ReplicationInfo,
    pub long_running: Vec<LongQuery>,
    pub bloat_candidates: Vec<BloatCandidate>,
    pub issues: Vec<String>,
}

// ============================================================================
// Tables
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct IndexBrief {
    pub name: String,
    pub bytes: i64,
    pub scans: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableActivity {
    pub live_tuples: i64,
    pub dead_tuples: i64,
    pub bloat_ratio: Option<f64>,
    pub inserts: i64,
    pub updates: i64,
    pub deletes: i64,
    pub hot_update_ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub name: String,
    pub kind: String,
    pub description: Option<String>,
    pub estimated_rows: i64,
    pub table_bytes: i64,
    pub index_bytes: i64,
    pub total_bytes: i64,
    pub toast_bytes: Option<i64>,
    pub toast_rows: Option<i64>,
    pub index_count: i64,
    pub indexes: Vec<IndexBrief>,
    pub activity: Option<TableActivity>,
    pub last_vacuum: Option<String>,
    pub last_autovacuum: Option<String>,
    pub last_analyze: Option<String>,
    pub last_autoanalyze: Option<String>,
    pub modifications_since_analyze: i64,
    pub xid_age: i64,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStatsReport {
    pub schema: String,
    pub table_pattern: String,
    pub tables: Vec<TableStats>,
    pub total_rows: i64,
    pub total_bytes: i64,
    pub high_bloat: Vec<String>,
    pub needs_analyze: Vec<String>,
}

// ============================================================================
// Index usage
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub is_primary: bool,
    pub is_unique: bool,
    pub bytes: i64,
    pub scans: i64,
    pub columns: String,
    pub definition: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateIndex {
    pub table: String,
    pub kept: String,
    pub duplicate: String,
    pub columns: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OversizedIndex {
    pub index: IndexInfo,
    pub table_bytes: i64,
    pub ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexUsageReport {
    pub schema: String,
    pub min_size_mb: f64,
    pub days_unused: i64,
    pub total_indexes: usize,
    pub total_bytes: i64,
    pub unused: Vec<IndexInfo>,
    pub rarely_used: Vec<IndexInfo>,
    pub duplicates: Vec<DuplicateIndex>,
    pub oversized: Vec<OversizedIndex>,
    pub unused_bytes: i64,
    pub savings_percent: Option<f64>,
}

// ============================================================================
// Locks and activity
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub pid: i64,
    pub user: Option<String>,
    pub application: Option<String>,
    pub client: Option<String>,
    pub state: Option<String>,
    pub duration_seconds: Option<f64>,
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockingChain {
    pub blocker: SessionInfo,
    pub blocked: Vec<SessionInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaitingLock {
    pub pid: i64,
    pub mode: String,
    pub locktype: String,
    pub relation: Option<String>,
    pub user: Option<String>,
    pub application: Option<String>,
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveQuery {
    pub pid: i64,
    pub user: Option<String>,
    pub application: Option<String>,
    pub state: Option<String>,
    pub duration_seconds: Option<f64>,
    pub wait_event_type: Option<String>,
    pub wait_event: Option<String>,
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockingReport {
    pub server_version: String,
    pub chains: Vec<BlockingChain>,
    /// `None` when lock details were not requested.
    pub waiting_locks: Option<Vec<WaitingLock>>,
    pub waiting_locks_total: usize,
    pub min_duration_ms: f64,
    pub long_running: Vec<ActiveQuery>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveQueriesReport {
    pub count: usize,
    pub queries: Vec<ActiveQuery>,
}
