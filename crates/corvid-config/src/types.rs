//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! environment = "production"
//!
//! [llm]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//!
//! [http_tool]
//! allowed_domains = ["api.example.com"]
//!
//! [sql]
//! database_url = "sqlite:///var/lib/corvid/sales.db"
//! ```
//!
//! Every section and field has a default, so a partial file (or none at
//! all) is a valid configuration.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Deployment environment; `production` enables the guard rails.
    pub environment: Environment,
    pub llm: LlmSettings,
    pub embedding: EmbeddingSettings,
    pub vector: VectorSettings,
    pub tls: TlsSettings,
    pub http_tool: HttpToolSettings,
    pub sql: SqlSettings,
    pub agent: AgentSettings,
    pub retrieval: RetrievalSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Key for the embedding endpoint, falling back to the LLM key.
    pub fn embedding_api_key(&self) -> Option<&str> {
        self.embedding
            .api_key
            .as_deref()
            .or(self.llm.api_key.as_deref())
    }

    /// Enforce startup guard rails and reject unusable values.
    ///
    /// - TLS verification disabled in production is a hard error.
    /// - Mock SQL data in production is forced off.
    pub fn finalize(mut self) -> Result<Self> {
        if !self.tls.verify {
            if self.is_production() {
                return Err(ConfigError::InsecureTls);
            }
            tracing::warn!(
                environment = %self.environment,
                "TLS certificate verification is DISABLED; outbound HTTPS is not authenticated"
            );
        }

        if self.is_production() && self.sql.mock_data {
            tracing::warn!("Mock SQL data is not allowed in production; disabling it");
            self.sql.mock_data = false;
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::invalid(
                "agent.max_iterations",
                "0",
                "must be at least 1",
            ));
        }
        if self.sql.max_rows == 0 {
            return Err(ConfigError::invalid("sql.max_rows", "0", "must be at least 1"));
        }
        if self.http_tool.timeout_ceiling_secs == 0 {
            return Err(ConfigError::invalid(
                "http_tool.timeout_ceiling_secs",
                "0",
                "must be at least 1",
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::invalid(
                "llm.temperature",
                self.llm.temperature.to_string(),
                "must be between 0.0 and 2.0",
            ));
        }

        Ok(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment
// ─────────────────────────────────────────────────────────────────────────────

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" | "local" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "prod" | "production" => Ok(Self::Production),
            other => Err(format!(
                "unknown environment '{other}' (expected development, staging or production)"
            )),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM / Embedding / Vector
// ─────────────────────────────────────────────────────────────────────────────

/// Completion endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// OpenAI-compatible base URL.
    pub base_url: String,
    /// API key. Prefer `CORVID_LLM_API_KEY` over storing it in a file.
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Retries for transient failures.
    pub max_retries: u32,
    /// Initial backoff; doubles on each retry.
    pub retry_backoff_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 1024,
            timeout_secs: 60,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// Embedding endpoint settings. Retrieval is disabled without a base URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub base_url: Option<String>,
    /// Falls back to the LLM key.
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
        }
    }
}

/// Vector search service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSettings {
    pub base_url: Option<String>,
    /// Default collection searched by retrieval nodes and `vector_search`.
    pub collection: String,
    pub top_k: usize,
    pub timeout_secs: u64,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            collection: "documents".to_string(),
            top_k: 5,
            timeout_secs: 15,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Security
// ─────────────────────────────────────────────────────────────────────────────

/// TLS settings for every outbound client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Verify server certificates. Cannot be disabled in production.
    pub verify: bool,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self { verify: true }
    }
}

/// Limits for the `http_request` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpToolSettings {
    /// When non-empty, only these domains (and their subdomains) are reachable.
    pub allowed_domains: Vec<String>,
    /// Hard cap on any requested timeout.
    pub timeout_ceiling_secs: u64,
    pub max_redirects: usize,
    pub max_response_bytes: usize,
}

impl Default for HttpToolSettings {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            timeout_ceiling_secs: 30,
            max_redirects: 5,
            max_response_bytes: 1024 * 1024,
        }
    }
}

/// Settings for the `sql_query` and `text_to_sql` tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlSettings {
    /// `sqlite://<path>`, `mock`, or empty to disable.
    pub database_url: String,
    /// Serve canned rows when no database is configured. Forced off in production.
    pub mock_data: bool,
    /// Row cap appended to queries without a `LIMIT`.
    pub max_rows: u32,
    pub timeout_secs: u64,
}

impl Default for SqlSettings {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            mock_data: false,
            max_rows: 1000,
            timeout_secs: 10,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent / Retrieval / Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Reasoning loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub max_iterations: u32,
    /// `react`, `structured` or `plan`.
    pub strategy: String,
    /// Observations longer than this are truncated before re-prompting.
    pub observation_max_chars: usize,
    pub system_prompt: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            strategy: "react".to_string(),
            observation_max_chars: 2000,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Degraded retrievals between aggregate alerts; 0 disables alerts.
    pub degradation_alert_threshold: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            degradation_alert_threshold: 10,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// When set, JSON logs are also written to daily files here.
    pub directory: Option<PathBuf>,
    /// Emit JSON on stderr instead of human-readable lines.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.environment, Environment::Development);
        assert!(settings.tls.verify);
        assert_eq!(settings.sql.max_rows, 1000);
        assert_eq!(settings.http_tool.timeout_ceiling_secs, 30);
        assert_eq!(settings.agent.strategy, "react");
    }

    #[test]
    fn test_partial_toml() {
        let settings = Settings::from_toml(
            r#"
environment = "staging"

[llm]
model = "local-model"

[http_tool]
allowed_domains = ["api.example.com"]
"#,
        )
        .unwrap();
        assert_eq!(settings.environment, Environment::Staging);
        assert_eq!(settings.llm.model, "local-model");
        assert_eq!(settings.llm.max_tokens, 1024);
        assert_eq!(settings.http_tool.allowed_domains, vec!["api.example.com"]);
        assert_eq!(settings.http_tool.max_redirects, 5);
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut settings = Settings::default();
        settings.sql.database_url = "mock".to_string();
        let parsed = Settings::from_toml(&settings.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_unknown_environment_rejected() {
        assert!(Settings::from_toml("environment = \"moon\"").is_err());
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Production));
    }

    #[test]
    fn test_finalize_insecure_tls_in_production() {
        let mut settings = Settings::default();
        settings.environment = Environment::Production;
        settings.tls.verify = false;
        assert!(matches!(settings.finalize(), Err(ConfigError::InsecureTls)));
    }

    #[test]
    fn test_finalize_allows_insecure_tls_outside_production() {
        let mut settings = Settings::default();
        settings.tls.verify = false;
        assert!(!settings.finalize().unwrap().tls.verify);
    }

    #[test]
    fn test_finalize_forces_mock_data_off_in_production() {
        let mut settings = Settings::default();
        settings.environment = Environment::Production;
        settings.sql.mock_data = true;
        let settings = settings.finalize().unwrap();
        assert!(!settings.sql.mock_data);

        let mut dev = Settings::default();
        dev.sql.mock_data = true;
        assert!(dev.finalize().unwrap().sql.mock_data);
    }

    #[test]
    fn test_finalize_rejects_zero_limits() {
        let mut settings = Settings::default();
        settings.agent.max_iterations = 0;
        let err = settings.finalize().unwrap_err();
        assert!(err.to_string().contains("agent.max_iterations"));
    }

    #[test]
    fn test_embedding_key_fallback() {
        let mut settings = Settings::default();
        settings.llm.api_key = Some("sk-llm".to_string());
        assert_eq!(settings.embedding_api_key(), Some("sk-llm"));
        settings.embedding.api_key = Some("sk-embed".to_string());
        assert_eq!(settings.embedding_api_key(), Some("sk-embed"));
    }
}
