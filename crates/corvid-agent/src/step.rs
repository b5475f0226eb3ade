//! Agent step log.
//!
//! A run records an append-only, ordered sequence of [`AgentStep`]s. The log
//! feeds the next reasoning prompt and is streamed to callers as it grows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Thought,
    Action,
    Observation,
    Plan,
    Final,
    Error,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thought => "thought",
            Self::Action => "action",
            Self::Observation => "observation",
            Self::Plan => "plan",
            Self::Final => "final",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded unit of reasoning, action or result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    pub step_type: StepType,
    pub content: String,
    /// Tool invoked by an `action` step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Arguments of an `action` step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    /// Structured tool result; only present on `observation` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl AgentStep {
    fn new(step_type: StepType, content: impl Into<String>) -> Self {
        Self {
            step_type,
            content: content.into(),
            tool: None,
            tool_input: None,
            tool_output: None,
            timestamp: Utc::now(),
        }
    }

    pub fn thought(content: impl Into<String>) -> Self {
        Self::new(StepType::Thought, content)
    }

    /// An action step; content reads `tool(args)`.
    pub fn action(tool: impl Into<String>, input: Value) -> Self {
        let tool = tool.into();
        let mut step = Self::new(StepType::Action, format!("{}({})", tool, input));
        step.tool = Some(tool);
        step.tool_input = Some(input);
        step
    }

    pub fn observation(content: impl Into<String>, tool_output: Value) -> Self {
        let mut step = Self::new(StepType::Observation, content);
        step.tool_output = Some(tool_output);
        step
    }

    pub fn plan(content: impl Into<String>) -> Self {
        Self::new(StepType::Plan, content)
    }

    pub fn final_answer(content: impl Into<String>) -> Self {
        Self::new(StepType::Final, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(StepType::Error, content)
    }

    pub fn is(&self, step_type: StepType) -> bool {
        self.step_type == step_type
    }
}

/// Append-only log of the steps of one run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct StepLog {
    steps: Vec<AgentStep>,
}

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step and return a reference to it.
    pub fn push(&mut self, step: AgentStep) -> &AgentStep {
        self.steps.push(step);
        &self.steps[self.steps.len() - 1]
    }

    pub fn steps(&self) -> &[AgentStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&AgentStep> {
        self.steps.last()
    }

    /// Most recent step of any of the given types.
    pub fn last_of(&self, types: &[StepType]) -> Option<&AgentStep> {
        self.steps.iter().rev().find(|s| types.contains(&s.step_type))
    }

    /// Content of the latest thought or observation, used as a best-effort
    /// answer when a run does not converge.
    pub fn fallback_answer(&self) -> Option<&str> {
        self.last_of(&[StepType::Thought, StepType::Observation])
            .map(|s| s.content.as_str())
            .filter(|c| !c.trim().is_empty())
    }

    /// Thought / Action / Observation transcript for re-prompting.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            match step.step_type {
                StepType::Thought => {
                    out.push_str("Thought: ");
                    out.push_str(&step.content);
                    out.push('\n');
                }
                StepType::Action => {
                    let tool = step.tool.as_deref().unwrap_or_default();
                    let input = step
                        .tool_input
                        .as_ref()
                        .map(Value::to_string)
                        .unwrap_or_else(|| "{}".to_string());
                    out.push_str(&format!("Action: {}\nAction Input: {}\n", tool, input));
                }
                StepType::Observation | StepType::Error => {
                    out.push_str("Observation: ");
                    out.push_str(&step.content);
                    out.push('\n');
                }
                StepType::Plan | StepType::Final => {}
            }
        }
        out
    }

    pub fn into_steps(self) -> Vec<AgentStep> {
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_step_fields() {
        let step = AgentStep::action("calculator", json!({"expression": "2+2"}));
        assert_eq!(step.step_type, StepType::Action);
        assert_eq!(step.tool.as_deref(), Some("calculator"));
        assert!(step.content.starts_with("calculator("));
        assert!(step.tool_output.is_none());
    }

    #[test]
    fn test_only_observation_carries_output() {
        let obs = AgentStep::observation("4", json!({"success": true, "result": 4}));
        assert!(obs.tool_output.is_some());
        assert!(AgentStep::thought("hmm").tool_output.is_none());
    }

    #[test]
    fn test_log_order_and_fallback() {
        let mut log = StepLog::new();
        log.push(AgentStep::thought("first"));
        log.push(AgentStep::action("t", json!({})));
        log.push(AgentStep::observation("seen", json!({"success": true})));
        assert_eq!(log.len(), 3);
        assert_eq!(log.steps()[0].content, "first");
        assert_eq!(log.fallback_answer(), Some("seen"));
    }

    #[test]
    fn test_fallback_skips_blank() {
        let mut log = StepLog::new();
        log.push(AgentStep::thought("  "));
        assert_eq!(log.fallback_answer(), None);
    }

    #[test]
    fn test_transcript_format() {
        let mut log = StepLog::new();
        log.push(AgentStep::thought("need math"));
        log.push(AgentStep::action("calculator", json!({"expression": "1+1"})));
        log.push(AgentStep::observation("2", json!({"success": true})));
        let transcript = log.transcript();
        assert_eq!(
            transcript,
            "Thought: need math\nAction: calculator\nAction Input: {\"expression\":\"1+1\"}\nObservation: 2\n"
        );
    }

    #[test]
    fn test_step_type_serialization() {
        let json = serde_json::to_value(AgentStep::final_answer("done")).unwrap();
        assert_eq!(json["step_type"], "final");
        assert!(json.get("tool").is_none());
    }
}
