//! Environment variable overrides.
//!
//! Applied after the config file, so the environment always wins.

use crate::error::{ConfigError, Result};
use crate::types::{Environment, Settings};

pub const ENV_ENVIRONMENT: &str = "CORVID_ENV";
pub const ENV_LLM_BASE_URL: &str = "CORVID_LLM_BASE_URL";
pub const ENV_LLM_API_KEY: &str = "CORVID_LLM_API_KEY";
pub const ENV_LLM_MODEL: &str = "CORVID_LLM_MODEL";
pub const ENV_EMBEDDING_BASE_URL: &str = "CORVID_EMBEDDING_BASE_URL";
pub const ENV_VECTOR_BASE_URL: &str = "CORVID_VECTOR_BASE_URL";
pub const ENV_VERIFY_SSL: &str = "CORVID_VERIFY_SSL";
pub const ENV_HTTP_ALLOWED_DOMAINS: &str = "CORVID_HTTP_ALLOWED_DOMAINS";
pub const ENV_SQL_DATABASE_URL: &str = "CORVID_SQL_DATABASE_URL";
pub const ENV_SQL_MOCK_DATA: &str = "CORVID_SQL_MOCK_DATA";
pub const ENV_MAX_ITERATIONS: &str = "CORVID_MAX_ITERATIONS";
pub const ENV_LOG_DIR: &str = "CORVID_LOG_DIR";
/// Fallback for the LLM key when `CORVID_LLM_API_KEY` is unset.
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut Settings) -> Result<Vec<&'static str>> {
    apply_overrides(settings, |key| std::env::var(key).ok())
}

/// Apply overrides from `lookup`. Returns the variables that were applied.
///
/// Empty values are ignored.
pub fn apply_overrides<F>(settings: &mut Settings, lookup: F) -> Result<Vec<&'static str>>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let mut applied = Vec::new();

    if let Some(v) = get(ENV_ENVIRONMENT) {
        settings.environment = v
            .parse::<Environment>()
            .map_err(|reason| ConfigError::invalid(ENV_ENVIRONMENT, &v, reason))?;
        applied.push(ENV_ENVIRONMENT);
    }
    if let Some(v) = get(ENV_LLM_BASE_URL) {
        settings.llm.base_url = v;
        applied.push(ENV_LLM_BASE_URL);
    }
    if let Some(v) = get(ENV_LLM_API_KEY) {
        settings.llm.api_key = Some(v);
        applied.push(ENV_LLM_API_KEY);
    } else if settings.llm.api_key.is_none()
        && let Some(v) = get(ENV_OPENAI_API_KEY)
    {
        settings.llm.api_key = Some(v);
        applied.push(ENV_OPENAI_API_KEY);
    }
    if let Some(v) = get(ENV_LLM_MODEL) {
        settings.llm.model = v;
        applied.push(ENV_LLM_MODEL);
    }
    if let Some(v) = get(ENV_EMBEDDING_BASE_URL) {
        settings.embedding.base_url = Some(v);
        applied.push(ENV_EMBEDDING_BASE_URL);
    }
    if let Some(v) = get(ENV_VECTOR_BASE_URL) {
        settings.vector.base_url = Some(v);
        applied.push(ENV_VECTOR_BASE_URL);
    }
    if let Some(v) = get(ENV_VERIFY_SSL) {
        settings.tls.verify = parse_bool(ENV_VERIFY_SSL, &v)?;
        applied.push(ENV_VERIFY_SSL);
    }
    if let Some(v) = get(ENV_HTTP_ALLOWED_DOMAINS) {
        settings.http_tool.allowed_domains = v
            .split(',')
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        applied.push(ENV_HTTP_ALLOWED_DOMAINS);
    }
    if let Some(v) = get(ENV_SQL_DATABASE_URL) {
        settings.sql.database_url = v;
        applied.push(ENV_SQL_DATABASE_URL);
    }
    if let Some(v) = get(ENV_SQL_MOCK_DATA) {
        settings.sql.mock_data = parse_bool(ENV_SQL_MOCK_DATA, &v)?;
        applied.push(ENV_SQL_MOCK_DATA);
    }
    if let Some(v) = get(ENV_MAX_ITERATIONS) {
        settings.agent.max_iterations = v
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(ENV_MAX_ITERATIONS, &v, "expected a positive integer"))?;
        applied.push(ENV_MAX_ITERATIONS);
    }
    if let Some(v) = get(ENV_LOG_DIR) {
        settings.logging.directory = Some(v.into());
        applied.push(ENV_LOG_DIR);
    }

    Ok(applied)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected true or false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn apply(vars: &[(&str, &str)]) -> Result<(Settings, Vec<&'static str>)> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut settings = Settings::default();
        let applied = apply_overrides(&mut settings, |k| map.get(k).cloned())?;
        Ok((settings, applied))
    }

    #[test]
    fn test_overrides() {
        let (settings, applied) = apply(&[
            ("CORVID_ENV", "prod"),
            ("CORVID_LLM_MODEL", "gpt-4o"),
            ("CORVID_VERIFY_SSL", "FALSE"),
            ("CORVID_HTTP_ALLOWED_DOMAINS", "API.example.com, docs.rs ,"),
            ("CORVID_MAX_ITERATIONS", "4"),
        ])
        .unwrap();
        assert!(settings.is_production());
        assert_eq!(settings.llm.model, "gpt-4o");
        assert!(!settings.tls.verify);
        assert_eq!(
            settings.http_tool.allowed_domains,
            vec!["api.example.com", "docs.rs"]
        );
        assert_eq!(settings.agent.max_iterations, 4);
        assert_eq!(applied.len(), 5);
    }

    #[test]
    fn test_openai_key_fallback() {
        let (settings, _) = apply(&[("OPENAI_API_KEY", "sk-openai")]).unwrap();
        assert_eq!(settings.llm.api_key.as_deref(), Some("sk-openai"));

        let (settings, applied) = apply(&[
            ("OPENAI_API_KEY", "sk-openai"),
            ("CORVID_LLM_API_KEY", "sk-corvid"),
        ])
        .unwrap();
        assert_eq!(settings.llm.api_key.as_deref(), Some("sk-corvid"));
        assert!(!applied.contains(&ENV_OPENAI_API_KEY));
    }

    #[test]
    fn test_empty_values_ignored() {
        let (settings, applied) = apply(&[("CORVID_LLM_MODEL", "  ")]).unwrap();
        assert_eq!(settings.llm.model, "gpt-4o-mini");
        assert!(applied.is_empty());
    }

    #[test]
    fn test_invalid_values() {
        let err = apply(&[("CORVID_VERIFY_SSL", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("CORVID_VERIFY_SSL"));
        assert!(apply(&[("CORVID_MAX_ITERATIONS", "-1")]).is_err());
        assert!(apply(&[("CORVID_ENV", "moon")]).is_err());
    }
}
