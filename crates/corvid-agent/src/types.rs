//! Core types for the agent crate.
//!
//! - [`RunId`]: identity of one strategy run, present in every log line
//! - [`AgentConfig`]: runtime configuration shared by all strategies
//! - [`StrategyKind`]: selector for the three reasoning strategies

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// ID Types
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random run ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Strategy Kind
// ─────────────────────────────────────────────────────────────────────────────

/// The reasoning strategy driving a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Free-text Thought / Action / Observation loop.
    #[default]
    React,
    /// Structured tool calls returned by the model.
    Structured,
    /// Plan up front, then execute with structured calls.
    Plan,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::React => "react",
            Self::Structured => "structured",
            Self::Plan => "plan",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "react" | "iterative" => Ok(Self::React),
            "structured" | "function_calling" | "tools" => Ok(Self::Structured),
            "plan" | "plan_execute" => Ok(Self::Plan),
            other => Err(format!(
                "unknown strategy '{other}' (expected react, structured or plan)"
            )),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default iteration cap for a run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Default observation length shown back to the model.
pub const DEFAULT_OBSERVATION_MAX_CHARS: usize = 2000;

/// Configuration for an agent run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model identifier to use.
    pub model: String,
    /// Maximum tokens for LLM responses.
    pub max_tokens: u32,
    /// Temperature for sampling (0.0 - 1.0).
    pub temperature: Option<f32>,
    /// Maximum reasoning iterations per run.
    pub max_iterations: u32,
    /// Observations longer than this are truncated before re-prompting.
    pub observation_max_chars: usize,
    /// Retries for a failed completion call inside a strategy.
    pub llm_retries: u32,
    /// Initial backoff between completion retries; doubles each attempt.
    pub retry_backoff: Duration,
    /// Extra instructions prepended to the strategy's own prompt.
    pub system_prompt: Option<String>,
}

impl AgentConfig {
    /// Create a new config with the specified model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: 1024,
            temperature: Some(0.0),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            observation_max_chars: DEFAULT_OBSERVATION_MAX_CHARS,
            llm_retries: 2,
            retry_backoff: Duration::from_millis(500),
            system_prompt: None,
        }
    }

    /// Set max tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max iterations. Zero is treated as one.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Set the observation truncation length.
    pub fn with_observation_max_chars(mut self, max_chars: usize) -> Self {
        self.observation_max_chars = max_chars;
        self
    }

    /// Set completion retry count and initial backoff.
    pub fn with_llm_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.llm_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    /// Set system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new("gpt-4o-mini")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn test_strategy_kind_parse() {
        assert_eq!("ReAct".parse::<StrategyKind>().unwrap(), StrategyKind::React);
        assert_eq!(
            "structured".parse::<StrategyKind>().unwrap(),
            StrategyKind::Structured
        );
        assert_eq!("plan".parse::<StrategyKind>().unwrap(), StrategyKind::Plan);
        assert!("chain".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_config_builders() {
        let config = AgentConfig::new("m")
            .with_max_iterations(0)
            .with_observation_max_chars(50)
            .with_temperature(0.3);
        assert_eq!(config.max_iterations, 1);
        assert_eq!(config.observation_max_chars, 50);
        assert_eq!(config.temperature, Some(0.3));
    }
}
