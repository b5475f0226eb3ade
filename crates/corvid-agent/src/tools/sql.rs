//! Read-only SQL query tool.
//!
//! Every statement passes the [`QuerySanitizer`] before it reaches a backend;
//! rejected SQL is never executed. SQLite queries run on a blocking worker
//! with a read-only connection and are interrupted when they overrun the
//! timeout.

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;

use corvid_guard::QuerySanitizer;

use crate::error::{AgentError, Result};
use crate::tool::{ParamExt, ParamType, Tool, ToolContext, ToolParameter, ToolResult};

/// Schema of the sample dataset served in mock mode.
pub const SAMPLE_SCHEMA: &str = "\
Table sales:
  id INTEGER PRIMARY KEY
  region TEXT        -- 'north', 'south', 'east' or 'west'
  product TEXT
  amount REAL        -- sale value in USD
  sold_on TEXT       -- ISO date, YYYY-MM-DD";

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Where queries are executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlBackend {
    /// A SQLite database file, opened read-only per query.
    Sqlite(PathBuf),
    /// Canned rows from the sample dataset.
    Mock,
    /// No database configured.
    Disabled,
}

impl SqlBackend {
    /// Parse a database URL: `sqlite://<path>`, `mock`, or empty for none.
    pub fn from_url(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Ok(Self::Disabled);
        }
        if url.eq_ignore_ascii_case("mock") {
            return Ok(Self::Mock);
        }
        match url.strip_prefix("sqlite://") {
            Some(path) if !path.is_empty() => Ok(Self::Sqlite(PathBuf::from(path))),
            _ => Err(AgentError::config(format!(
                "Unsupported database URL '{url}'; expected sqlite://<path> or mock"
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Mock => "mock",
            Self::Disabled => "disabled",
        }
    }
}

/// Rows returned by a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

fn sqlite_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

fn query_sqlite(conn: &Connection, sql: &str) -> Result<QueryRows> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let mut record = Map::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            record.insert(name.clone(), sqlite_value(row.get_ref(i)?));
        }
        rows.push(record);
    }
    Ok(QueryRows { columns, rows })
}

fn sample_rows(limit: usize) -> QueryRows {
    const SAMPLE: &[(i64, &str, &str, f64, &str)] = &[
        (1, "north", "widget", 120.0, "2024-01-05"),
        (2, "south", "gadget", 75.5, "2024-01-06"),
        (3, "east", "widget", 210.25, "2024-01-09"),
        (4, "west", "gizmo", 48.0, "2024-01-12"),
        (5, "north", "gadget", 99.99, "2024-01-15"),
    ];
    let columns: Vec<String> = ["id", "region", "product", "amount", "sold_on"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    let rows = SAMPLE
        .iter()
        .take(limit)
        .map(|(id, region, product, amount, sold_on)| {
            let mut record = Map::new();
            record.insert("id".to_string(), json!(id));
            record.insert("region".to_string(), json!(region));
            record.insert("product".to_string(), json!(product));
            record.insert("amount".to_string(), json!(amount));
            record.insert("sold_on".to_string(), json!(sold_on));
            record
        })
        .collect();
    QueryRows { columns, rows }
}

// ─────────────────────────────────────────────────────────────────────────────
// SQL Query Tool
// ─────────────────────────────────────────────────────────────────────────────

/// Tool for running sanitized, read-only SQL.
#[derive(Debug, Clone)]
pub struct SqlQueryTool {
    backend: SqlBackend,
    sanitizer: QuerySanitizer,
    timeout: Duration,
}

impl SqlQueryTool {
    pub fn new(backend: SqlBackend, sanitizer: QuerySanitizer, timeout: Duration) -> Self {
        Self {
            backend,
            sanitizer,
            timeout,
        }
    }

    /// Mock data is never served in production.
    pub fn in_production(mut self) -> Self {
        if self.backend == SqlBackend::Mock {
            tracing::warn!("Mock SQL data requested in production; disabling it");
            self.backend = SqlBackend::Disabled;
        }
        self
    }

    pub fn backend(&self) -> &SqlBackend {
        &self.backend
    }

    async fn run_sqlite(&self, path: PathBuf, sql: String) -> Result<QueryRows> {
        let (handle_tx, mut handle_rx) = oneshot::channel();
        let task = tokio::task::spawn_blocking(move || -> Result<QueryRows> {
            let conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            let _ = handle_tx.send(conn.get_interrupt_handle());
            query_sqlite(&conn, &sql)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(join)) => Err(AgentError::internal(format!("Query worker failed: {join}"))),
            Err(_) => {
                // Still opening: nothing to interrupt yet.
                if let Ok(interrupt) = handle_rx.try_recv() {
                    interrupt.interrupt();
                }
                Err(AgentError::Database(format!(
                    "Query timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

#[async_trait]
impl Tool for SqlQueryTool {
    fn name(&self) -> &str {
        "sql_query"
    }

    fn description(&self) -> &str {
        "Run a read-only SQL SELECT query against the configured database. Mutating \
         statements, multiple statements and comments are rejected, and a LIMIT is \
         always applied."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("query", ParamType::String, "A single SELECT statement"),
            ToolParameter::optional(
                "limit",
                ParamType::Integer,
                "Maximum rows to return; capped by the server maximum",
            ),
        ]
    }

    fn timeout(&self) -> Duration {
        self.timeout + Duration::from_secs(1)
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult> {
        if ctx.is_cancelled() {
            return Ok(ToolResult::error("Operation cancelled"));
        }

        let query = params.required_str("query")?;
        let requested = params
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l.min(u64::from(u32::MAX)) as u32);

        let (safe_sql, validation) = self.sanitizer.sanitize_with_limit(query, requested);
        if !validation.is_valid {
            return Ok(ToolResult::error(format!(
                "Query rejected: {}",
                validation.errors.join("; ")
            )));
        }

        let rows = match &self.backend {
            SqlBackend::Disabled => {
                return Ok(ToolResult::error("No database is configured for sql_query"));
            }
            SqlBackend::Mock => {
                let limit = requested.unwrap_or(self.sanitizer.max_rows()) as usize;
                sample_rows(limit.min(self.sanitizer.max_rows() as usize))
            }
            SqlBackend::Sqlite(path) => match self.run_sqlite(path.clone(), safe_sql.clone()).await
            {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(run_id = %ctx.run_id, error = %e, "SQL query failed");
                    return Ok(ToolResult::error(e.to_string()));
                }
            },
        };

        tracing::debug!(
            run_id = %ctx.run_id,
            backend = self.backend.kind(),
            row_count = rows.rows.len(),
            "SQL query executed"
        );

        let mut out = json!({
            "query": safe_sql,
            "columns": rows.columns,
            "row_count": rows.rows.len(),
            "rows": rows.rows,
        });
        if !validation.warnings.is_empty() {
            out["warnings"] = json!(validation.warnings);
        }
        if self.backend == SqlBackend::Mock {
            out["mock"] = json!(true);
        }
        Ok(ToolResult::json(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sqlite_tool(max_rows: u32) -> (SqlQueryTool, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sales.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE sales (id INTEGER PRIMARY KEY, region TEXT, amount REAL);
             INSERT INTO sales (region, amount) VALUES ('north', 10.5), ('south', 20.0), ('east', NULL);",
        )
        .unwrap();
        drop(conn);
        let tool = SqlQueryTool::new(
            SqlBackend::Sqlite(path),
            QuerySanitizer::new(max_rows),
            Duration::from_secs(5),
        );
        (tool, dir)
    }

    async fn run(tool: &SqlQueryTool, params: Value) -> Value {
        tool.execute(params, &ToolContext::default())
            .await
            .unwrap()
            .to_value()
    }

    #[test]
    fn test_backend_from_url() {
        assert_eq!(
            SqlBackend::from_url("sqlite:///tmp/x.db").unwrap(),
            SqlBackend::Sqlite(PathBuf::from("/tmp/x.db"))
        );
        assert_eq!(SqlBackend::from_url("MOCK").unwrap(), SqlBackend::Mock);
        assert_eq!(SqlBackend::from_url("").unwrap(), SqlBackend::Disabled);
        assert!(SqlBackend::from_url("postgres://db").is_err());
    }

    #[tokio::test]
    async fn test_sqlite_select() {
        let (tool, _dir) = sqlite_tool(100);
        let value = run(&tool, json!({"query": "SELECT region, amount FROM sales ORDER BY id"})).await;
        assert_eq!(value["success"], true);
        assert_eq!(value["row_count"], 3);
        assert_eq!(value["columns"], json!(["region", "amount"]));
        assert_eq!(value["rows"][0]["region"], "north");
        assert_eq!(value["rows"][2]["amount"], Value::Null);
        assert!(value["query"].as_str().unwrap().ends_with("LIMIT 100"));
    }

    #[tokio::test]
    async fn test_requested_limit_is_honored() {
        let (tool, _dir) = sqlite_tool(100);
        let value = run(&tool, json!({"query": "SELECT * FROM sales", "limit": 2})).await;
        assert_eq!(value["row_count"], 2);
    }

    #[tokio::test]
    async fn test_mutation_is_never_executed() {
        let (tool, dir) = sqlite_tool(100);
        let value = run(&tool, json!({"query": "SELECT * FROM sales; DROP TABLE sales;"})).await;
        assert_eq!(value["success"], false);
        assert!(value["error"].as_str().unwrap().starts_with("Query rejected"));

        let conn = Connection::open(dir.path().join("sales.db")).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sales", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_sqlite_error_is_failure_result() {
        let (tool, _dir) = sqlite_tool(100);
        let value = run(&tool, json!({"query": "SELECT * FROM missing_table"})).await;
        assert_eq!(value["success"], false);
        assert!(value["error"].as_str().unwrap().contains("missing_table"));
    }

    #[tokio::test]
    async fn test_missing_database_is_failure_result() {
        let dir = TempDir::new().unwrap();
        let tool = SqlQueryTool::new(
            SqlBackend::Sqlite(dir.path().join("absent.db")),
            QuerySanitizer::new(10),
            Duration::from_secs(5),
        );
        let value = run(&tool, json!({"query": "SELECT 1"})).await;
        assert_eq!(value["success"], false);
        assert!(!value["error"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slow_query_times_out() {
        let (mut tool, _dir) = sqlite_tool(10);
        tool.timeout = Duration::from_millis(200);
        let tables: Vec<String> = (0..20).map(|i| format!("sales t{i}")).collect();
        let query = format!("SELECT COUNT(*) AS n FROM {}", tables.join(", "));

        let started = std::time::Instant::now();
        let value = run(&tool, json!({ "query": query })).await;

        assert_eq!(value["success"], false);
        assert!(value["error"].as_str().unwrap().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_mock_rows() {
        let tool = SqlQueryTool::new(SqlBackend::Mock, QuerySanitizer::new(3), Duration::from_secs(1));
        let value = run(&tool, json!({"query": "SELECT * FROM sales"})).await;
        assert_eq!(value["row_count"], 3);
        assert_eq!(value["mock"], true);
    }

    #[tokio::test]
    async fn test_mock_disabled_in_production() {
        let tool = SqlQueryTool::new(SqlBackend::Mock, QuerySanitizer::default(), Duration::from_secs(1))
            .in_production();
        assert_eq!(tool.backend(), &SqlBackend::Disabled);
        let value = run(&tool, json!({"query": "SELECT 1"})).await;
        assert_eq!(value["success"], false);
    }
}
