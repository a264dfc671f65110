//! Text presentation of reports.

use serde_json::Value;

use super::*;

const RULE: &str = "==================================================";
const THIN_RULE: &str = "--------------------------------------------------";

/// Maximum rows shown by the text view of a query result.
const TEXT_ROW_LIMIT: usize = 50;

/// Format a byte count with two decimals, `1536` -> `1.50 KB`.
pub fn format_bytes(bytes: i64) -> String {
    let mut size = bytes.max(0) as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} PB")
}

/// `1234567` -> `1,234,567`.
fn thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if n < 0 {
        format!("-{out}")
    } else {
        out
    }
}

fn duration(seconds: Option<f64>) -> String {
    match seconds {
        None => "unknown".to_string(),
        Some(s) if s < 60.0 => format!("{s:.1}s"),
        Some(s) if s < 3600.0 => format!("{}m {:02}s", (s / 60.0) as i64, (s % 60.0) as i64),
        Some(s) => format!("{}h {:02}m", (s / 3600.0) as i64, ((s % 3600.0) / 60.0) as i64),
    }
}

fn marker(severity: Severity) -> &'static str {
    match severity {
        Severity::Good => "OK",
        Severity::Info => "NOTE",
        Severity::Warning => "WARNING",
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Default)]
struct Text(String);

impl Text {
    fn line(&mut self, s: impl AsRef<str>) {
        self.0.push_str(s.as_ref());
        self.0.push('\n');
    }

    fn blank(&mut self) {
        self.0.push('\n');
    }

    fn finding(&mut self, indent: &str, f: &Finding) {
        self.line(format!("{indent}[{}] {}", marker(f.severity), f.message));
    }

    fn finish(self) -> String {
        self.0.trim_end().to_string()
    }
}

impl Report {
    /// Human-readable rendering for text transports.
    pub fn render_text(&self) -> String {
        match self {
            Report::Connection(r) => connection(r),
            Report::Schemas(r) => schemas(r),
            Report::Tables(r) => tables(r),
            Report::Query(r) => query(r),
            Report::Plan(r) => plan(r),
            Report::SlowQueries(r) => slow_queries(r),
            Report::Health(r) => health(r),
            Report::IndexSuggestions(r) => index_suggestions(r),
            Report::TableStats(r) => table_stats(r),
            Report::IndexUsage(r) => index_usage(r),
            Report::Blocking(r) => blocking(r),
            Report::ActiveQueries(r) => active_queries(r),
        }
    }
}

fn connection(r: &ConnectionReport) -> String {
    let mut t = Text::default();
    if r.connected {
        t.line("Successfully connected to PostgreSQL");
        if let Some(v) = &r.version {
            t.line(format!("Version: {v}"));
        }
    } else {
        t.line(format!(
            "Connection failed: {}",
            r.error.as_deref().unwrap_or("unknown error")
        ));
    }
    if let Some(url) = &r.database_url {
        t.line(format!("Database URL ({}): {url}", r.source));
    }
    t.finish()
}

fn schemas(r: &SchemaListing) -> String {
    if r.schemas.is_empty() {
        return "No schemas found.".to_string();
    }
    let mut t = Text::default();
    t.line("Available schemas:");
    let mut current: Option<&str> = None;
    for s in &r.schemas {
        if current != Some(s.kind.as_str()) {
            current = Some(s.kind.as_str());
            t.blank();
            t.line(format!("{}:", s.kind));
        }
        t.line(format!("  - {} (owner: {})", s.name, s.owner));
    }
    t.finish()
}

fn tables(r: &TableListing) -> String {
    if r.tables.is_empty() {
        return format!("No tables found in schema '{}'.", r.schema);
    }
    let mut t = Text::default();
    t.line(format!("Tables in schema '{}':", r.schema));
    t.blank();
    for table in &r.tables {
        t.line(format!(
            "  - {} ({} columns, {})",
            table.name, table.columns, table.size
        ));
    }
    t.finish()
}

fn query(r: &QueryOutput) -> String {
    if r.rows.is_empty() {
        return "Query executed successfully. No results returned.".to_string();
    }
    let mut t = Text::default();
    t.line(format!("Query results ({} rows):", r.row_count));
    t.blank();
    let header = r.columns.join(" | ");
    t.line(&header);
    t.line("-".repeat(header.chars().count()));
    for row in r.rows.iter().take(TEXT_ROW_LIMIT) {
        let cells: Vec<String> = r
            .columns
            .iter()
            .map(|c| row.get(c).map(cell).unwrap_or_default())
            .collect();
        t.line(cells.join(" | "));
    }
    if r.row_count > TEXT_ROW_LIMIT {
        t.blank();
        t.line(format!("... and {} more rows", r.row_count - TEXT_ROW_LIMIT));
    }
    t.finish()
}

fn plan(r: &PlanReport) -> String {
    let mut t = Text::default();
    if let Some(doc) = &r.document {
        t.line(format!(
            "Execution Plan ({} format):",
            r.format.to_uppercase()
        ));
        t.blank();
        match doc {
            Value::String(s) => t.line(s),
            other => t.line(serde_json::to_string_pretty(other).unwrap_or_default()),
        }
        return t.finish();
    }

    if r.plan_lines.is_empty() {
        return "No execution plan returned.".to_string();
    }

    t.line("Query Execution Plan:");
    t.line(RULE);
    t.blank();
    for line in &r.plan_lines {
        t.line(line);
    }
    t.blank();
    t.line(RULE);
    t.line("Performance Analysis:");
    t.blank();
    if let Some(timing) = &r.timing {
        t.line("Timing Summary:");
        t.line(format!("   - Planning Time: {:.2} ms", timing.planning_ms));
        t.line(format!("   - Execution Time: {:.2} ms", timing.execution_ms));
        t.line(format!("   - Total Time: {:.2} ms", timing.total_ms));
        t.blank();
    }
    if r.findings.is_empty() {
        t.line("[OK] No obvious performance issues detected.");
    }
    for f in &r.findings {
        t.finding("", f);
    }
    t.blank();
    t.line(THIN_RULE);
    t.line("Tips:");
    for tip in &r.tips {
        t.line(format!("- {tip}"));
    }
    t.finish()
}

fn enable_steps(t: &mut Text, steps: &[String]) {
    for (i, step) in steps.iter().enumerate() {
        t.line(format!("  {}. {}", i + 1, step));
    }
}

fn slow_queries(r: &SlowQueryReport) -> String {
    let mut t = Text::default();
    if !r.extension_available {
        t.line("pg_stat_statements extension is not available.");
        t.blank();
        t.line("To enable slow query tracking, ask your database administrator to:");
        enable_steps(&mut t, &r.enable_steps);
        return t.finish();
    }
    if r.queries.is_empty() {
        return format!(
            "No queries found with mean execution time > {}ms",
            r.threshold_ms
        );
    }

    t.line(format!("Slow Queries Report (threshold: {}ms)", r.threshold_ms));
    t.line(RULE);
    t.blank();
    for (idx, q) in r.queries.iter().enumerate() {
        t.line(format!("Query #{}", idx + 1));
        t.line(format!("Query: {}", q.query));
        t.line("Performance Stats:");
        t.line(format!("  - Calls: {}", thousands(q.calls)));
        t.line(format!("  - Mean Time: {:.2} ms", q.mean_ms));
        t.line(format!(
            "  - Total Time: {:.2} ms ({:.2} seconds)",
            q.total_ms,
            q.total_ms / 1000.0
        ));
        t.line(format!("  - Min/Max: {:.2} ms / {:.2} ms", q.min_ms, q.max_ms));
        t.line(format!("  - Std Dev: {:.2} ms", q.stddev_ms));
        t.line(format!("  - Rows/Call: {:.1}", q.rows_per_call));
        t.line(format!("  - Cache Hit: {:.1}%", q.cache_hit_percent));
        t.blank();
        t.line("Analysis:");
        for s in &q.suggestions {
            t.line(format!("  - {s}"));
        }
        t.blank();
        t.line(THIN_RULE);
        t.blank();
    }
    t.line("Summary:");
    t.line(format!("- Found {} slow queries", r.queries.len()));
    t.line(format!("- Threshold: {}ms mean execution time", r.threshold_ms));
    t.line("- Tip: Use explain-query to analyze specific queries in detail");
    t.finish()
}

fn health(r: &HealthReport) -> String {
    let mut t = Text::default();
    let c = &r.connections;
    t.line("PostgreSQL Health Check Report");
    t.line(RULE);
    t.blank();

    t.line("Connection Statistics:");
    t.line(format!("  - Active connections: {}", c.active));
    t.line(format!("  - Idle connections: {}", c.idle));
    t.line(format!("  - Idle in transaction: {}", c.idle_in_transaction));
    t.line(format!("  - Waiting connections: {}", c.waiting));
    t.line(format!(
        "  - Total connections: {}/{} ({:.1}% used)",
        c.total, c.max, c.usage_percent
    ));
    if c.usage_percent > 80.0 {
        t.line("  [WARNING] Connection usage above 80%");
    }
    if c.idle_in_transaction > 5 {
        t.line("  [WARNING] Many idle transactions, check for uncommitted transactions");
    }
    t.blank();

    t.line("Database Size:");
    t.line(format!("  - Current size: {}", format_bytes(r.database_size)));
    if !r.largest_tables.is_empty() {
        t.line("  - Top 5 largest tables:");
        for table in &r.largest_tables {
            t.line(format!("    - {}: {}", table.name, format_bytes(table.bytes)));
        }
    }
    t.blank();

    t.line("Cache Performance:");
    t.line(format!("  - Cache hit ratio: {:.2}%", r.cache_hit_ratio));
    if r.cache_hit_ratio < 90.0 {
        t.line("  [WARNING] Cache hit ratio below 90%, consider increasing shared_buffers");
    } else if r.cache_hit_ratio >= 99.0 {
        t.line("  [OK] Excellent cache performance");
    } else {
        t.line("  [OK] Good cache performance");
    }
    t.blank();

    t.line("Vacuum/Maintenance Status:");
    if r.vacuum.is_empty() {
        t.line("  [OK] No tables with significant dead tuples");
    } else {
        t.line("  - Tables with high dead tuple count:");
        for v in &r.vacuum {
            t.line(format!(
                "    - {}.{}: {} dead tuples ({}% of live)",
                v.schema,
                v.table,
                thousands(v.dead_tuples),
                v.dead_ratio
            ));
            if v.dead_ratio > 20.0 {
                t.line("      [WARNING] Consider manual VACUUM");
            }
        }
    }
    t.blank();

    if r.replication.replicas > 0 {
        t.line("Replication Status:");
        t.line(format!("  - Active replicas: {}", r.replication.replicas));
        match r.replication.max_lag_seconds {
            Some(lag) => {
                t.line(format!("  - Maximum lag: {}", duration(Some(lag))));
                if lag > 60.0 {
                    t.line("  [WARNING] Replication lag exceeds 1 minute");
                }
            }
            None => t.line("  [OK] All replicas in sync"),
        }
        t.blank();
    }

    if !r.long_running.is_empty() {
        t.line("Long Running Queries:");
        for q in &r.long_running {
            t.line(format!(
                "  - PID {}: Running for {}",
                q.pid,
                duration(Some(q.duration_seconds))
            ));
            t.line(format!("    Query: {}", q.query));
        }
        t.line("  [WARNING] Consider investigating these queries");
        t.blank();
    }

    if !r.bloat_candidates.is_empty() {
        t.line("Potential Table Bloat:");
        for b in &r.bloat_candidates {
            t.line(format!(
                "  - {}: {} ({}% of total relation size)",
                b.table,
                format_bytes(b.table_bytes),
                b.table_ratio
            ));
        }
        t.line("  Low ratios may indicate index bloat");
        t.blank();
    }

    t.line("Overall Health Summary:");
    let label = match r.status {
        HealthStatus::Excellent => "EXCELLENT",
        HealthStatus::Good => "GOOD (needs attention)",
        HealthStatus::Poor => "POOR (immediate action needed)",
    };
    t.line(format!("  - Health Score: {}/100 {}", r.score, label));
    if r.issues.is_empty() {
        t.line("  - No major issues detected");
    } else {
        t.line("  - Issues found:");
        for issue in &r.issues {
            t.line(format!("    - {issue}"));
        }
    }
    t.blank();
    t.line("Next Steps:");
    t.line("- Use get-slow-queries to identify performance bottlenecks");
    t.line("- Use explain-query to analyze problematic queries");
    t.line("- Monitor this health check regularly");
    t.finish()
}

fn index_suggestions(r: &IndexSuggestionReport) -> String {
    let mut t = Text::default();
    t.line("INDEX SUGGESTION ANALYSIS");
    t.line(RULE);
    t.blank();

    match r.mode {
        SuggestionMode::Structural => {
            t.line("[WARNING] pg_stat_statements extension not installed.");
            t.line("To enable query workload analysis:");
            enable_steps(&mut t, &r.enable_steps);
            t.blank();
            t.line("Falling back to table structure analysis...");
            t.blank();
            if !r.tables_without_pk.is_empty() {
                t.line("Tables without Primary Keys:");
                for table in &r.tables_without_pk {
                    t.line(format!("  - {table}"));
                    t.line("    SUGGESTION: Add primary key to ensure data integrity");
                }
                t.blank();
            }
            if !r.unindexed_foreign_keys.is_empty() {
                t.line("Foreign Keys without Indexes:");
                for fk in &r.unindexed_foreign_keys {
                    t.line(format!(
                        "  - {}.{}.{} -> {}",
                        fk.schema, fk.table, fk.column, fk.references
                    ));
                    t.line(format!("    SUGGESTION: {}", fk.suggestion));
                }
                t.blank();
            }
            if r.tables_without_pk.is_empty() && r.unindexed_foreign_keys.is_empty() {
                t.line("[OK] No structural issues found");
                t.blank();
            }
        }
        SuggestionMode::Workload => {
            t.line("Analyzing Query Workload...");
            t.blank();
            if r.queries.is_empty() {
                t.line("No queries found matching criteria.");
                t.line(format!(
                    "Try lowering min_calls ({}) or min_duration_ms ({})",
                    r.min_calls, r.min_duration_ms
                ));
            }
            for (idx, q) in r.queries.iter().enumerate() {
                t.line(format!("Query #{}:", idx + 1));
                t.line(format!(
                    "  Calls: {} | Avg: {:.2}ms | Total: {:.2}s",
                    thousands(q.calls),
                    q.mean_ms,
                    q.total_ms / 1000.0
                ));
                t.line(format!("  Query: {}", q.query));
                for col in &q.missing_indexes {
                    t.line(format!("  [NOTE] Missing index on {col}"));
                }
                for note in &q.notes {
                    t.finding("  ", note);
                }
                t.blank();
            }
            if !r.recommended_indexes.is_empty() {
                t.line("RECOMMENDED INDEXES:");
                t.line(THIN_RULE);
                for s in &r.recommended_indexes {
                    t.line(s);
                }
                t.blank();
                t.line("Important Notes:");
                t.line("- Test these indexes in a development environment first");
                t.line("- Monitor index size and maintenance overhead");
                t.line("- Consider CREATE INDEX CONCURRENTLY in production");
                t.line("- Run ANALYZE after creating indexes");
            }
        }
    }

    t.blank();
    t.line("Best Practices:");
    t.line("- Keep indexes focused (avoid too many columns)");
    t.line("- Consider partial indexes for filtered queries");
    t.line("- Use INCLUDE for covering indexes (PostgreSQL 11+)");
    t.line("- Monitor unused indexes with analyze-index-usage");
    t.finish()
}

fn table_stats(r: &TableStatsReport) -> String {
    let mut t = Text::default();
    t.line("TABLE STATISTICS ANALYSIS");
    t.line(RULE);
    t.blank();
    if r.tables.is_empty() {
        t.line(format!(
            "No tables found matching pattern '{}' in schema '{}'",
            r.table_pattern, r.schema
        ));
        return t.finish();
    }

    for table in &r.tables {
        t.line(format!("Table: {}.{}", r.schema, table.name));
        t.line(THIN_RULE);
        if let Some(desc) = &table.description {
            t.line(format!("Description: {desc}"));
        }
        t.line(format!("Type: {}", table.kind));
        t.line(format!("Estimated Rows: {}", thousands(table.estimated_rows)));
        t.blank();
        t.line("Storage:");
        t.line(format!("  - Table Size: {}", format_bytes(table.table_bytes)));
        if table.index_bytes > 0 {
            t.line(format!("  - Indexes Size: {}", format_bytes(table.index_bytes)));
        }
        if let (Some(bytes), Some(rows)) = (table.toast_bytes, table.toast_rows) {
            t.line(format!("  - TOAST Size: {}", format_bytes(bytes)));
            t.line(format!("  - TOAST Rows: {}", thousands(rows)));
        }
        t.line(format!("  - Total Size: {}", format_bytes(table.total_bytes)));

        if !table.indexes.is_empty() {
            t.blank();
            t.line("Indexes:");
            t.line(format!("  - Count: {}", table.index_count));
            for idx in &table.indexes {
                t.line(format!(
                    "    - {}: {} (scans: {})",
                    idx.name,
                    format_bytes(idx.bytes),
                    thousands(idx.scans)
                ));
            }
        }

        if let Some(a) = &table.activity {
            t.blank();
            t.line("Activity:");
            t.line(format!("  - Live Tuples: {}", thousands(a.live_tuples)));
            t.line(format!("  - Dead Tuples: {}", thousands(a.dead_tuples)));
            if let Some(ratio) = a.bloat_ratio {
                t.line(format!("  - Bloat Ratio: {ratio:.1}%"));
            }
            t.line(format!("  - Inserts: {}", thousands(a.inserts)));
            t.line(format!("  - Updates: {}", thousands(a.updates)));
            t.line(format!("  - Deletes: {}", thousands(a.deletes)));
            if let Some(hot) = a.hot_update_ratio {
                t.line(format!("  - HOT Update Ratio: {hot:.1}%"));
            }
        }

        t.blank();
        t.line("Maintenance:");
        for (label, value) in [
            ("Last Vacuum", &table.last_vacuum),
            ("Last Autovacuum", &table.last_autovacuum),
            ("Last Analyze", &table.last_analyze),
            ("Last Autoanalyze", &table.last_autoanalyze),
        ] {
            if let Some(v) = value {
                t.line(format!("  - {label}: {v}"));
            }
        }
        if table.modifications_since_analyze > 0 {
            t.line(format!(
                "  - Modifications since analyze: {}",
                thousands(table.modifications_since_analyze)
            ));
        }
        for f in &table.findings {
            t.finding("  ", f);
        }
        t.blank();
    }

    t.line("SUMMARY");
    t.line(RULE);
    t.line(format!("Total Tables: {}", r.tables.len()));
    t.line(format!("Total Rows: {}", thousands(r.total_rows)));
    t.line(format!("Total Size: {}", format_bytes(r.total_bytes)));
    t.blank();
    t.line("Recommendations:");
    if !r.high_bloat.is_empty() {
        t.line(format!("- Tables with high bloat: {}", r.high_bloat.join(", ")));
        t.line("  Run: VACUUM (VERBOSE, ANALYZE) table_name;");
    }
    if !r.needs_analyze.is_empty() {
        t.line(format!(
            "- Tables needing ANALYZE: {}",
            r.needs_analyze.join(", ")
        ));
        t.line("  Run: ANALYZE table_name;");
    }
    if r.high_bloat.is_empty() && r.needs_analyze.is_empty() {
        t.line("- All tables appear well-maintained");
    }
    t.finish()
}

fn index_line(t: &mut Text, idx: &IndexInfo) {
    t.line(format!("- {}.{} on {}", idx.schema, idx.name, idx.table));
}

fn index_usage(r: &IndexUsageReport) -> String {
    let mut t = Text::default();
    t.line("INDEX USAGE ANALYSIS");
    t.line(RULE);
    t.blank();
    if r.total_indexes == 0 {
        t.line(format!(
            "No indexes found in schema '{}' larger than {}MB",
            r.schema, r.min_size_mb
        ));
        return t.finish();
    }

    t.line("Summary:");
    t.line(format!("  - Total indexes analyzed: {}", r.total_indexes));
    t.line(format!("  - Total index size: {}", format_bytes(r.total_bytes)));
    t.line(format!("  - Unused indexes: {}", r.unused.len()));
    t.line(format!("  - Unused size: {}", format_bytes(r.unused_bytes)));
    t.line(format!(
        "  - Usage window: {} days (statistics since last reset)",
        r.days_unused
    ));
    t.blank();

    if !r.unused.is_empty() {
        t.line("UNUSED INDEXES (never scanned):");
        t.line(THIN_RULE);
        for idx in r.unused.iter().take(10) {
            index_line(&mut t, idx);
            t.line(format!("  Size: {}", format_bytes(idx.bytes)));
            t.line(format!("  Columns: {}", idx.columns));
            t.line(format!(
                "  Action: DROP INDEX IF EXISTS {}.{};",
                idx.schema, idx.name
            ));
            t.blank();
        }
        if r.unused.len() > 10 {
            t.line(format!("... and {} more unused indexes", r.unused.len() - 10));
            t.blank();
        }
    }

    if !r.rarely_used.is_empty() {
        t.line("RARELY USED INDEXES (< 100 scans):");
        t.line(THIN_RULE);
        for idx in r.rarely_used.iter().take(5) {
            index_line(&mut t, idx);
            t.line(format!(
                "  Size: {} | Scans: {}",
                format_bytes(idx.bytes),
                idx.scans
            ));
            t.line(format!("  Columns: {}", idx.columns));
            t.line("  Consider removing if not needed for uniqueness");
            t.blank();
        }
    }

    if !r.duplicates.is_empty() {
        t.line("DUPLICATE INDEXES (same columns):");
        t.line(THIN_RULE);
        for d in &r.duplicates {
            t.line(format!("Table: {}", d.table));
            t.line(format!("  - {} ~ {}", d.kept, d.duplicate));
            t.line(format!("    Columns: {}", d.columns));
            t.line("    Consider keeping only one");
            t.blank();
        }
    }

    if !r.oversized.is_empty() {
        t.line("OVERSIZED INDEXES (> 50% of table size):");
        t.line(THIN_RULE);
        for o in r.oversized.iter().take(5) {
            index_line(&mut t, &o.index);
            t.line(format!(
                "  Index: {} | Ratio: {:.1}x table size",
                format_bytes(o.index.bytes),
                o.ratio
            ));
            t.line("  Review if all columns are necessary");
            t.blank();
        }
    }

    if let Some(pct) = r.savings_percent {
        t.line("POTENTIAL SAVINGS:");
        t.line(format!(
            "Removing unused indexes would free up: {}",
            format_bytes(r.unused_bytes)
        ));
        t.line(format!("This is {pct:.1}% of total index space"));
    }
    t.finish()
}

fn session(t: &mut Text, indent: &str, s: &SessionInfo) {
    t.line(format!("{indent}PID: {}", s.pid));
    t.line(format!(
        "{indent}User: {}",
        s.user.as_deref().unwrap_or("unknown")
    ));
    t.line(format!(
        "{indent}Application: {}",
        s.application.as_deref().filter(|a| !a.is_empty()).unwrap_or("Unknown")
    ));
    t.line(format!(
        "{indent}Client: {}",
        s.client.as_deref().unwrap_or("Local")
    ));
    t.line(format!("{indent}Duration: {}", duration(s.duration_seconds)));
    if let Some(state) = &s.state {
        t.line(format!("{indent}State: {state}"));
    }
    t.line(format!("{indent}Query: {}", s.query));
}

fn blocking(r: &BlockingReport) -> String {
    let mut t = Text::default();
    t.line("BLOCKING QUERIES ANALYSIS");
    t.line(RULE);
    t.blank();
    t.line(format!("PostgreSQL Version: {}", r.server_version));
    t.blank();

    if r.chains.is_empty() {
        t.line("[OK] No blocking queries detected");
        t.blank();
    } else {
        let situations: usize = r.chains.iter().map(|c| c.blocked.len()).sum();
        t.line(format!("[WARNING] Found {situations} blocking situation(s):"));
        t.blank();
        for (idx, chain) in r.chains.iter().enumerate() {
            t.line(format!("Blocking Chain #{}", idx + 1));
            t.line(THIN_RULE);
            t.line("BLOCKER:");
            session(&mut t, "  ", &chain.blocker);
            t.blank();
            t.line(format!("BLOCKED ({} queries):", chain.blocked.len()));
            for blocked in &chain.blocked {
                session(&mut t, "    ", blocked);
                t.blank();
            }
            let pid = chain.blocker.pid;
            t.line("RESOLUTION OPTIONS:");
            t.line(format!("  1. Cancel blocking query: SELECT pg_cancel_backend({pid});"));
            t.line(format!(
                "  2. Terminate blocking session: SELECT pg_terminate_backend({pid});"
            ));
            t.line("  3. Wait for blocking query to complete");
            t.blank();
        }
    }

    if let Some(locks) = &r.waiting_locks {
        t.line("LOCK INFORMATION");
        t.line(RULE);
        if locks.is_empty() {
            t.line("No processes waiting for locks.");
        } else {
            t.line(format!(
                "Found {} processes waiting for locks:",
                r.waiting_locks_total
            ));
            t.blank();
            for lock in locks {
                t.line(format!(
                    "- PID {} waiting for {} lock on {}",
                    lock.pid, lock.mode, lock.locktype
                ));
                if let Some(rel) = &lock.relation {
                    t.line(format!("  Table: {rel}"));
                }
                t.line(format!(
                    "  User: {}",
                    lock.user.as_deref().unwrap_or("unknown")
                ));
                t.line(format!("  Query: {}", lock.query));
            }
            if r.waiting_locks_total > locks.len() {
                t.line(format!(
                    "... and {} more waiting locks",
                    r.waiting_locks_total - locks.len()
                ));
            }
        }
        t.blank();
    }

    t.line("LONG-RUNNING QUERIES");
    t.line(RULE);
    if r.long_running.is_empty() {
        t.line(format!(
            "No queries running longer than {}ms",
            r.min_duration_ms
        ));
    } else {
        t.line(format!(
            "Queries running longer than {}ms:",
            r.min_duration_ms
        ));
        t.blank();
        for q in &r.long_running {
            active_query(&mut t, q);
        }
    }
    t.blank();
    t.line("Best Practices:");
    t.line("- Keep transactions short and commit or roll back promptly");
    t.line("- Use NOWAIT or lock_timeout for non-critical operations");
    t.line("- Set statement_timeout for long-running queries");
    t.line("- Use SELECT ... FOR UPDATE SKIP LOCKED when appropriate");
    t.finish()
}

fn active_query(t: &mut Text, q: &ActiveQuery) {
    t.line(format!(
        "- PID {} - Duration: {}",
        q.pid,
        duration(q.duration_seconds)
    ));
    t.line(format!(
        "  User: {} | App: {}",
        q.user.as_deref().unwrap_or("unknown"),
        q.application.as_deref().filter(|a| !a.is_empty()).unwrap_or("Unknown")
    ));
    let mut state = format!("  State: {}", q.state.as_deref().unwrap_or("unknown"));
    if let Some(wait_type) = &q.wait_event_type {
        state.push_str(&format!(
            " | Waiting on: {}/{}",
            wait_type,
            q.wait_event.as_deref().unwrap_or("?")
        ));
    }
    t.line(state);
    t.line(format!("  Query: {}", q.query));
}

fn active_queries(r: &ActiveQueriesReport) -> String {
    if r.queries.is_empty() {
        return "No active queries.".to_string();
    }
    let mut t = Text::default();
    t.line(format!("Active queries: {}", r.count));
    t.blank();
    for q in &r.queries {
        active_query(&mut t, q);
    }
    t.finish()
}
