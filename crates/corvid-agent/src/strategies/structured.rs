//! Structured tool-call loop.
//!
//! Keeps an explicit role-tagged transcript and sends the tool catalog as
//! machine-readable schemas. A response without tool calls is the answer;
//! otherwise every requested call runs and its result is appended as a
//! `tool` message keyed to the call id.

use async_trait::async_trait;
use std::sync::Arc;

use corvid_llm::{Message, SharedBackend};

use crate::step::AgentStep;
use crate::strategy::{
    ReasoningStrategy, build_request, complete, fallback_answer, llm_failure, run_tool,
    system_prompt,
};
use crate::stream::{RunRecorder, Termination};
use crate::tool::ToolRegistry;
use crate::types::{AgentConfig, StrategyKind};

const SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the provided tools when they help \
answer the user's request accurately. When you have enough information, reply with the final \
answer as plain text without calling any tool.";

/// Strategy driven by the model's structured tool calls.
#[derive(Clone)]
pub struct StructuredStrategy {
    backend: SharedBackend,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl StructuredStrategy {
    pub fn new(backend: SharedBackend, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        Self {
            backend,
            tools,
            config,
        }
    }
}

#[async_trait]
impl ReasoningStrategy for StructuredStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Structured
    }

    fn max_iterations(&self) -> u32 {
        self.config.max_iterations
    }

    async fn drive(&self, query: &str, run: &mut RunRecorder) -> Termination {
        let definitions = self.tools.to_llm_definitions();
        let mut messages = vec![
            Message::system(system_prompt(&self.config, SYSTEM_PROMPT)),
            Message::user(query),
        ];
        let mut last_output: Option<String> = None;

        loop {
            if run.is_cancelled() {
                tracing::info!(run_id = %run.run_id(), iteration = run.iterations(), "Run cancelled");
                return Termination::cancelled();
            }
            if run.iterations() >= self.config.max_iterations {
                tracing::warn!(
                    run_id = %run.run_id(),
                    max_iterations = self.config.max_iterations,
                    "Max iterations reached"
                );
                let fallback = fallback_answer(run, last_output.as_deref());
                return Termination::max_iterations(self.config.max_iterations, fallback);
            }

            let iteration = run.begin_iteration();
            let request =
                build_request(&self.config, messages.clone()).with_tools(definitions.clone());

            let response = match complete(&self.backend, request, &self.config).await {
                Ok(response) => response,
                Err(e) => return llm_failure(run, &e),
            };
            let text = response.text();

            if !response.has_tool_calls() {
                run.record(AgentStep::final_answer(&text));
                tracing::info!(run_id = %run.run_id(), iterations = iteration, "Final answer reached");
                return Termination::final_answer(text);
            }

            let calls = response.tool_calls().to_vec();
            tracing::debug!(
                run_id = %run.run_id(),
                iteration,
                tool_count = calls.len(),
                tools = %calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", "),
                "Model requested tools"
            );

            if !text.trim().is_empty() {
                run.record(AgentStep::thought(text.trim()));
                last_output = Some(text.clone());
            }
            messages.push(Message::assistant_tool_calls(
                response.message.content.clone(),
                calls.clone(),
            ));

            // Strictly sequential, in the order the model listed them
            for call in calls {
                let observation =
                    run_tool(&self.tools, &self.config, run, &call.name, call.arguments).await;
                messages.push(Message::tool_result(call.id, observation));
            }
        }
    }
}
