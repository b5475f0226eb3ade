//! Iterative reasoning loop with free-text tool calling.
//!
//! Each iteration re-prompts with the tool catalog, the question and the
//! transcript so far, then parses `Thought:`, `Action:`/`Action Input:` or
//! `Final Answer:` out of the response.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use corvid_llm::{Message, SharedBackend};

use crate::parser::{ActionInput, parse_react_output};
use crate::step::AgentStep;
use crate::strategy::{
    ReasoningStrategy, build_request, complete, fallback_answer, llm_failure,
    record_input_error, run_tool, system_prompt,
};
use crate::stream::{RunRecorder, Termination};
use crate::tool::ToolRegistry;
use crate::types::{AgentConfig, StrategyKind};

/// Consecutive responses without an action or final answer before the raw
/// output is accepted as the answer.
pub const MAX_CONSECUTIVE_MISSES: u32 = 2;

const FORMAT_INSTRUCTIONS: &str = "\
Use the following format:

Thought: think about what to do next
Action: the tool to use, one of [{tool_names}]
Action Input: the tool arguments as a JSON object
Observation: the tool result (this is provided to you, never write it yourself)
... (Thought/Action/Action Input/Observation can repeat)
Thought: I now know the final answer
Final Answer: the final answer to the original question

Write at most one Action per response and stop after its Action Input.";

/// The ReAct (reason + act) strategy.
#[derive(Clone)]
pub struct ReactStrategy {
    backend: SharedBackend,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl ReactStrategy {
    pub fn new(backend: SharedBackend, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        Self {
            backend,
            tools,
            config,
        }
    }

    fn system_message(&self) -> String {
        let base = format!(
            "You answer questions by reasoning step by step and calling tools when needed.\n\n\
             You have access to the following tools:\n{}\n\n{}",
            self.tools.catalog(),
            FORMAT_INSTRUCTIONS.replace("{tool_names}", &self.tools.names().join(", "))
        );
        system_prompt(&self.config, &base)
    }

    fn user_message(query: &str, transcript: &str) -> String {
        if transcript.is_empty() {
            format!("Question: {}", query)
        } else {
            format!("Question: {}\n\n{}", query, transcript)
        }
    }
}

#[async_trait]
impl ReasoningStrategy for ReactStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::React
    }

    fn max_iterations(&self) -> u32 {
        self.config.max_iterations
    }

    async fn drive(&self, query: &str, run: &mut RunRecorder) -> Termination {
        let system = self.system_message();
        let mut misses = 0u32;
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
            let request = build_request(
                &self.config,
                vec![
                    Message::system(&system),
                    Message::user(Self::user_message(query, &run.log().transcript())),
                ],
            )
            .with_stop(vec!["\nObservation:".to_string()]);

            let text = match complete(&self.backend, request, &self.config).await {
                Ok(response) => response.text(),
                Err(e) => return llm_failure(run, &e),
            };
            tracing::debug!(run_id = %run.run_id(), iteration, response_len = text.len(), "LLM response received");

            let parsed = parse_react_output(&text);
            let no_match = parsed.is_no_match();

            if let Some(thought) = &parsed.thought {
                run.record(AgentStep::thought(thought));
            }

            if let Some(answer) = parsed.final_answer {
                run.record(AgentStep::final_answer(&answer));
                tracing::info!(run_id = %run.run_id(), iterations = iteration, "Final answer reached");
                return Termination::final_answer(answer);
            }

            if let Some(action) = parsed.action {
                misses = 0;
                match action.input {
                    ActionInput::Json(input) => {
                        run_tool(&self.tools, &self.config, run, &action.tool, input).await;
                    }
                    ActionInput::Malformed(raw) => {
                        run.record(AgentStep::action(&action.tool, Value::String(raw.clone())));
                        record_input_error(
                            run,
                            &format!(
                                "Action Input for '{}' is not a valid JSON object: {}",
                                action.tool, raw
                            ),
                        );
                    }
                }
            } else if no_match {
                misses += 1;
                let candidate = parsed
                    .thought
                    .clone()
                    .unwrap_or_else(|| text.trim().to_string());

                if misses >= MAX_CONSECUTIVE_MISSES && !candidate.is_empty() {
                    tracing::info!(
                        run_id = %run.run_id(),
                        iteration,
                        "No tool syntax in consecutive responses, using output as answer"
                    );
                    run.record(AgentStep::final_answer(&candidate));
                    return Termination::final_answer(candidate);
                }

                record_input_error(
                    run,
                    "Response contained neither an Action nor a Final Answer. Follow the format.",
                );
            }

            if !text.trim().is_empty() {
                last_output = Some(text);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepType;
    use crate::stream::RunState;
    use crate::tool::{MockTool, ParamType, ToolParameter, ToolResult};
    use crate::types::RunId;
    use corvid_llm::{CompletionResponse, LlmError, MockBackend, Usage};
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn registry() -> (Arc<ToolRegistry>, Arc<MockTool>) {
        let tool = Arc::new(
            MockTool::new("calculator")
                .with_parameters(vec![ToolParameter::required(
                    "expression",
                    ParamType::String,
                    "Math expression",
                )])
                .with_response(ToolResult::json(json!({"result": 6.0}))),
        );
        let mut registry = ToolRegistry::new();
        registry.register_arc(tool.clone());
        (Arc::new(registry), tool)
    }

    fn config(max_iterations: u32) -> AgentConfig {
        AgentConfig::new("test-model")
            .with_max_iterations(max_iterations)
            .with_llm_retries(0, Duration::from_millis(1))
    }

    async fn drive(strategy: &ReactStrategy) -> (Termination, RunRecorder) {
        let mut run = RunRecorder::new(RunId::new(), CancellationToken::new());
        let t = strategy.drive("What is sqrt(16) + 2?", &mut run).await;
        (t, run)
    }

    #[tokio::test]
    async fn test_action_then_final() {
        let backend = Arc::new(MockBackend::with_texts([
            "Action: calculator\nAction Input: {\"expression\": \"sqrt(16) + 2\"}",
            "Final Answer: 6",
        ]));
        let (tools, tool) = registry();
        let strategy = ReactStrategy::new(backend.clone(), tools, config(5));

        let (termination, run) = drive(&strategy).await;
        assert_eq!(termination, Termination::final_answer("6"));

        let types: Vec<StepType> = run.log().steps().iter().map(|s| s.step_type).collect();
        assert_eq!(
            types,
            vec![StepType::Action, StepType::Observation, StepType::Final]
        );
        assert_eq!(tool.calls(), vec![json!({"expression": "sqrt(16) + 2"})]);

        // Second prompt carries the transcript
        let second = &backend.requests()[1];
        let user = second.messages[1].text_content();
        assert!(user.contains("Action: calculator"));
        assert!(user.contains("Observation:"));
        assert_eq!(second.stop, vec!["\nObservation:".to_string()]);
    }

    #[tokio::test]
    async fn test_catalog_in_system_prompt() {
        let backend = Arc::new(MockBackend::with_text("Final Answer: done"));
        let (tools, _) = registry();
        let strategy = ReactStrategy::new(backend.clone(), tools, config(2));
        drive(&strategy).await;

        let system = backend.requests()[0].messages[0].text_content().to_string();
        assert!(system.contains("- calculator: Mock tool: calculator"));
        assert!(system.contains("one of [calculator]"));
    }

    #[tokio::test]
    async fn test_unknown_tool_observation_lists_available() {
        let backend = Arc::new(MockBackend::with_texts([
            "Action: web_search\nAction Input: {\"q\": \"x\"}",
            "Final Answer: ok",
        ]));
        let (tools, _) = registry();
        let strategy = ReactStrategy::new(backend, tools, config(5));
        let (_, run) = drive(&strategy).await;

        let obs = run.log().steps()[1].clone();
        assert_eq!(obs.step_type, StepType::Observation);
        assert!(obs.content.starts_with("Error: Tool not found: web_search"));
        assert!(obs.content.contains("Available tools: calculator"));
        assert_eq!(obs.tool_output.unwrap()["success"], false);
    }

    #[tokio::test]
    async fn test_malformed_input_recorded_as_error_observation() {
        let backend = Arc::new(MockBackend::with_texts([
            "Action: calculator\nAction Input: sqrt(16)",
            "Final Answer: 4",
        ]));
        let (tools, tool) = registry();
        let strategy = ReactStrategy::new(backend, tools, config(5));
        let (termination, run) = drive(&strategy).await;

        assert!(termination.state.is_success());
        assert_eq!(tool.call_count(), 0);
        assert!(run.log().steps()[1].content.starts_with("Error: Action Input"));
    }

    #[tokio::test]
    async fn test_two_misses_degrade_to_answer() {
        let backend = Arc::new(MockBackend::with_texts([
            "The answer is probably six.",
            "It is six.",
        ]));
        let (tools, _) = registry();
        let strategy = ReactStrategy::new(backend, tools, config(5));
        let (termination, run) = drive(&strategy).await;

        assert_eq!(termination, Termination::final_answer("It is six."));
        assert_eq!(run.iterations(), 2);
    }

    #[tokio::test]
    async fn test_thought_only_degrades_to_thought() {
        let backend = Arc::new(MockBackend::repeating("Thought: six seems right"));
        let (tools, _) = registry();
        let strategy = ReactStrategy::new(backend, tools, config(5));
        let (termination, _) = drive(&strategy).await;
        assert_eq!(termination.answer.as_deref(), Some("six seems right"));
    }

    #[tokio::test]
    async fn test_action_resets_miss_counter() {
        let backend = Arc::new(MockBackend::with_texts([
            "hmm",
            "Action: calculator\nAction Input: {\"expression\": \"1\"}",
            "still thinking",
            "Final Answer: 1",
        ]));
        let (tools, _) = registry();
        let strategy = ReactStrategy::new(backend, tools, config(10));
        let (termination, run) = drive(&strategy).await;
        assert_eq!(termination.answer.as_deref(), Some("1"));
        assert_eq!(run.iterations(), 4);
    }

    #[tokio::test]
    async fn test_max_iterations_with_fallback() {
        let backend = Arc::new(MockBackend::repeating(""));
        let (tools, _) = registry();
        let strategy = ReactStrategy::new(backend.clone(), tools, config(3));
        let (termination, run) = drive(&strategy).await;

        assert_eq!(termination.state, RunState::MaxIterations);
        assert!(!termination.answer.unwrap().is_empty());
        assert_eq!(run.iterations(), 3);
        assert_eq!(backend.request_count(), 3);
    }

    #[tokio::test]
    async fn test_max_iterations_prefers_last_observation() {
        let backend = Arc::new(MockBackend::repeating(
            "Action: calculator\nAction Input: {\"expression\": \"1+1\"}",
        ));
        let (tools, _) = registry();
        let strategy = ReactStrategy::new(backend, tools, config(2));
        let (termination, _) = drive(&strategy).await;
        assert_eq!(termination.state, RunState::MaxIterations);
        assert!(termination.answer.unwrap().contains("\"result\": 6.0"));
    }

    #[tokio::test]
    async fn test_llm_error_terminates() {
        let backend = Arc::new(MockBackend::scripted(vec![Err(LlmError::Auth(
            "bad key".to_string(),
        ))]));
        let (tools, _) = registry();
        let strategy = ReactStrategy::new(backend, tools, config(3));
        let (termination, run) = drive(&strategy).await;

        assert_eq!(termination.state, RunState::LlmError);
        assert_eq!(run.log().last().unwrap().step_type, StepType::Error);
    }

    #[tokio::test]
    async fn test_transient_llm_error_is_retried() {
        let backend = Arc::new(MockBackend::scripted(vec![
            Err(LlmError::Network("reset".to_string())),
            Ok(CompletionResponse::text_response(
                "id",
                "m",
                "Final Answer: ok",
                Usage::default(),
            )),
        ]));
        let (tools, _) = registry();
        let config = config(3).with_llm_retries(2, Duration::from_millis(1));
        let strategy = ReactStrategy::new(backend.clone(), tools, config);
        let (termination, _) = drive(&strategy).await;
        assert!(termination.state.is_success());
        assert_eq!(backend.request_count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_call() {
        let backend = Arc::new(MockBackend::repeating("Final Answer: x"));
        let (tools, _) = registry();
        let strategy = ReactStrategy::new(backend.clone(), tools, config(3));
        let token = CancellationToken::new();
        token.cancel();
        let mut run = RunRecorder::new(RunId::new(), token);
        let termination = strategy.drive("q", &mut run).await;
        assert_eq!(termination.state, RunState::Cancelled);
        assert_eq!(backend.request_count(), 0);
    }
}
