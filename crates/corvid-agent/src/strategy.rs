//! The reasoning strategy abstraction and helpers shared by all strategies.

use async_trait::async_trait;
use serde_json::Value;

use corvid_llm::{CompletionRequest, CompletionResponse, LlmError, Message, SharedBackend, with_retry};

use crate::step::AgentStep;
use crate::stream::{RunRecorder, Termination};
use crate::tool::ToolRegistry;
use crate::types::{AgentConfig, StrategyKind};

/// An orchestration policy that drives tool use toward an answer.
///
/// `drive` owns the state machine. It records steps through the
/// [`RunRecorder`] as they happen and returns how the run ended; the
/// [`Agent`](crate::Agent) wraps it with start/end events and the final
/// [`RunResult`](crate::RunResult).
#[async_trait]
pub trait ReasoningStrategy: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> StrategyKind;

    /// Iteration cap for one run.
    fn max_iterations(&self) -> u32;

    /// Drive one run to a terminal state.
    async fn drive(&self, query: &str, run: &mut RunRecorder) -> Termination;
}

/// Call the completion endpoint, retrying transient failures with doubling
/// backoff.
pub(crate) async fn complete(
    backend: &SharedBackend,
    request: CompletionRequest,
    config: &AgentConfig,
) -> std::result::Result<CompletionResponse, LlmError> {
    let name = backend.name().to_string();
    with_retry(config.llm_retries, config.retry_backoff, &name, || {
        let backend = backend.clone();
        let request = request.clone();
        async move { backend.complete(request).await }
    })
    .await
}

/// Build a completion request from the agent configuration.
pub(crate) fn build_request(config: &AgentConfig, messages: Vec<Message>) -> CompletionRequest {
    let mut request = CompletionRequest::new(&config.model, messages, config.max_tokens);
    if let Some(temperature) = config.temperature {
        request = request.with_temperature(temperature);
    }
    request
}

/// System prompt with any configured prefix.
pub(crate) fn system_prompt(config: &AgentConfig, base: &str) -> String {
    match &config.system_prompt {
        Some(prefix) if !prefix.trim().is_empty() => format!("{}\n\n{}", prefix.trim(), base),
        _ => base.to_string(),
    }
}

/// Truncate to `max_chars` characters, marking the cut.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}... [truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

/// Execute one tool call inside a run.
///
/// Records the `action` step, emits `tool_start`/`tool_end`, and records the
/// `observation` step. Returns the observation text shown to the model.
pub(crate) async fn run_tool(
    tools: &ToolRegistry,
    config: &AgentConfig,
    run: &mut RunRecorder,
    name: &str,
    input: Value,
) -> String {
    run.record(AgentStep::action(name, input.clone()));
    run.tool_start(name, &input);

    tracing::info!(run_id = %run.run_id(), iteration = run.iterations(), tool = %name, "Executing tool");
    let result = tools.execute(name, input, &run.tool_context()).await;
    let output = result.to_value();
    run.tool_end(name, result.is_success(), &output);

    let mut content = truncate_chars(&result.to_llm_content(), config.observation_max_chars);
    if !tools.contains(name) {
        content.push_str(&format!(
            ". Available tools: {}",
            tools.names().join(", ")
        ));
    }
    run.record(AgentStep::observation(&content, output));
    content
}

/// Record a malformed model response as an `error` step.
///
/// The transcript shows it to the model as an observation so the next
/// iteration can correct itself.
pub(crate) fn record_input_error(run: &mut RunRecorder, message: &str) {
    tracing::debug!(run_id = %run.run_id(), iteration = run.iterations(), %message, "Malformed model output");
    run.record(AgentStep::error(format!("Error: {}", message)));
}

/// Best-effort answer for a run that did not converge.
pub(crate) fn fallback_answer(run: &RunRecorder, last_output: Option<&str>) -> String {
    run.log()
        .fallback_answer()
        .map(str::to_string)
        .or_else(|| {
            last_output
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            format!(
                "No final answer was reached within {} iterations.",
                run.iterations()
            )
        })
}

/// Record a failed completion call and end the run in `LlmError`.
pub(crate) fn llm_failure(run: &mut RunRecorder, error: &LlmError) -> Termination {
    tracing::error!(run_id = %run.run_id(), iteration = run.iterations(), error = %error, "LLM call failed");
    run.record(AgentStep::error(format!("LLM call failed: {}", error)));
    Termination::llm_error(error.to_string())
}
