//! Plan-then-execute.
//!
//! One completion call produces an ordered list of steps; a fresh
//! [`StructuredStrategy`] then executes the request with the plan attached,
//! recording into the same run so both phases share one step log.

use async_trait::async_trait;
use std::sync::Arc;

use corvid_llm::{Message, SharedBackend};

use crate::parser::parse_plan;
use crate::step::AgentStep;
use crate::strategies::StructuredStrategy;
use crate::strategy::{ReasoningStrategy, build_request, complete, llm_failure, system_prompt};
use crate::stream::{RunRecorder, Termination};
use crate::tool::ToolRegistry;
use crate::types::{AgentConfig, StrategyKind};

const PLANNER_PROMPT: &str = "You are a planning assistant. Break the user's request into a short \
ordered list of concrete steps that can be carried out with the available tools. Respond with a \
JSON array of strings and nothing else.";

/// Plan used when the planner's output cannot be read at all.
pub fn default_plan() -> Vec<String> {
    vec![
        "Gather the information needed to answer the request using the available tools"
            .to_string(),
        "Combine the results into a final answer".to_string(),
    ]
}

/// Render plan steps as a numbered list.
pub fn format_plan(steps: &[String]) -> String {
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The plan-then-execute strategy.
#[derive(Clone)]
pub struct PlanExecuteStrategy {
    backend: SharedBackend,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl PlanExecuteStrategy {
    pub fn new(backend: SharedBackend, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        Self {
            backend,
            tools,
            config,
        }
    }

    /// Ask the model for a plan. Unreadable output falls back to
    /// [`default_plan`]; a transport failure is returned as-is.
    async fn make_plan(&self, query: &str) -> Result<Vec<String>, corvid_llm::LlmError> {
        let tool_names = self.tools.names().join(", ");
        let request = build_request(
            &self.config,
            vec![
                Message::system(system_prompt(&self.config, PLANNER_PROMPT)),
                Message::user(format!("Available tools: {}\n\nRequest: {}", tool_names, query)),
            ],
        );
        let response = complete(&self.backend, request, &self.config).await?;
        Ok(parse_plan(&response.text()).unwrap_or_else(|| {
            tracing::warn!("Planner output unreadable, using default plan");
            default_plan()
        }))
    }
}

#[async_trait]
impl ReasoningStrategy for PlanExecuteStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Plan
    }

    fn max_iterations(&self) -> u32 {
        self.config.max_iterations
    }

    async fn drive(&self, query: &str, run: &mut RunRecorder) -> Termination {
        if run.is_cancelled() {
            return Termination::cancelled();
        }

        let steps = match self.make_plan(query).await {
            Ok(steps) => steps,
            Err(e) => return llm_failure(run, &e),
        };
        let plan = format_plan(&steps);
        tracing::info!(run_id = %run.run_id(), plan_steps = steps.len(), "Plan created");
        run.record(AgentStep::plan(&plan));

        let executor =
            StructuredStrategy::new(self.backend.clone(), self.tools.clone(), self.config.clone());
        let guided = format!(
            "{}\n\nFollow this plan, one step at a time:\n{}",
            query, plan
        );
        executor.drive(&guided, run).await
    }
}
