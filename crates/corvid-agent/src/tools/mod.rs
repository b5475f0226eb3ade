//! Built-in tools.
//!
//! - `calculator`: safe arithmetic evaluation
//! - `http_request`: outbound HTTP behind the egress guard
//! - `sql_query`: sanitized read-only SQL
//! - `text_to_sql`: SQL generation (needs an LLM backend)
//! - `datetime`: date/time arithmetic
//! - `statistics`: summary statistics
//! - `vector_search`: semantic search (needs an embedder and index)

mod calculator;
mod datetime;
mod http;
mod sql;
mod statistics;
mod text_to_sql;
mod vector_search;

use std::time::Duration;

use corvid_guard::{EgressGuard, QuerySanitizer};
use corvid_llm::{SharedBackend, SharedEmbedder, SharedVectorIndex};

use crate::tool::ToolRegistry;

pub use calculator::CalculatorTool;
pub use datetime::DateTimeTool;
pub use http::{HttpRequestTool, HttpToolConfig};
pub use sql::{QueryRows, SAMPLE_SCHEMA, SqlBackend, SqlQueryTool};
pub use statistics::{DEFAULT_STATISTICS, StatisticsTool, describe as describe_statistics};
pub use text_to_sql::TextToSqlTool;
pub use vector_search::{MAX_TOP_K, VectorSearchTool};

// ─────────────────────────────────────────────────────────────────────────────
// Built-in registry
// ─────────────────────────────────────────────────────────────────────────────

/// Retrieval services for `vector_search`.
#[derive(Clone)]
pub struct RetrievalServices {
    pub embedder: SharedEmbedder,
    pub index: SharedVectorIndex,
    pub collection: String,
    pub top_k: u64,
}

/// What the built-in tools are wired to.
#[derive(Clone)]
pub struct BuiltinToolsConfig {
    /// Production disables mock SQL data.
    pub production: bool,
    pub egress: EgressGuard,
    pub http: HttpToolConfig,
    pub sql_backend: SqlBackend,
    pub sql_max_rows: u32,
    pub sql_timeout: Duration,
    /// Schema description handed to `text_to_sql`.
    pub sql_schema: String,
    /// Backend and model for `text_to_sql`.
    pub llm: Option<(SharedBackend, String)>,
    pub retrieval: Option<RetrievalServices>,
}

impl Default for BuiltinToolsConfig {
    fn default() -> Self {
        Self {
            production: false,
            egress: EgressGuard::new(),
            http: HttpToolConfig::default(),
            sql_backend: SqlBackend::Disabled,
            sql_max_rows: corvid_guard::sql::DEFAULT_MAX_ROWS,
            sql_timeout: Duration::from_secs(10),
            sql_schema: SAMPLE_SCHEMA.to_string(),
            llm: None,
            retrieval: None,
        }
    }
}

impl BuiltinToolsConfig {
    pub fn with_llm(mut self, backend: SharedBackend, model: impl Into<String>) -> Self {
        self.llm = Some((backend, model.into()));
        self
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalServices) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    pub fn with_sql_backend(mut self, backend: SqlBackend) -> Self {
        self.sql_backend = backend;
        self
    }
}

/// Register every built-in tool whose dependencies are configured.
///
/// `text_to_sql` needs an LLM and `vector_search` needs retrieval services;
/// the rest are always present.
pub fn register_builtin_tools(registry: &mut ToolRegistry, config: BuiltinToolsConfig) {
    let sanitizer = QuerySanitizer::new(config.sql_max_rows);

    registry.register(CalculatorTool::new());
    registry.register(DateTimeTool::new());
    registry.register(StatisticsTool::new());
    registry.register(HttpRequestTool::new(config.egress, config.http));

    let mut sql = SqlQueryTool::new(config.sql_backend, sanitizer.clone(), config.sql_timeout);
    if config.production {
        sql = sql.in_production();
    }
    registry.register(sql);

    if let Some((backend, model)) = config.llm {
        registry.register(TextToSqlTool::new(
            backend,
            model,
            config.sql_schema,
            sanitizer,
        ));
    }

    if let Some(retrieval) = config.retrieval {
        registry.register(VectorSearchTool::new(
            retrieval.embedder,
            retrieval.index,
            retrieval.collection,
            retrieval.top_k,
        ));
    }

    tracing::debug!(tools = ?registry.names(), "Built-in tools registered");
}

/// A registry seeded with the built-in tools.
pub fn builtin_registry(config: BuiltinToolsConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, config);
    registry
}
