//! Streaming run events.
//!
//! A strategy records every step through a [`RunRecorder`], which appends to
//! the run's [`StepLog`] and, for streamed runs, emits the matching
//! [`AgentEvent`] on a channel. Streamed and non-streamed runs therefore
//! share one code path and produce the same step order.

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::step::{AgentStep, StepLog};
use crate::tool::ToolContext;
use crate::types::RunId;

// ─────────────────────────────────────────────────────────────────────────────
// Run State and Result
// ─────────────────────────────────────────────────────────────────────────────

/// State of a run. Every state but `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    FinalAnswer,
    MaxIterations,
    LlmError,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::FinalAnswer)
    }
}

/// How a strategy ended a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Termination {
    pub state: RunState,
    pub answer: Option<String>,
    pub error: Option<String>,
}

impl Termination {
    pub fn final_answer(answer: impl Into<String>) -> Self {
        Self {
            state: RunState::FinalAnswer,
            answer: Some(answer.into()),
            error: None,
        }
    }

    /// Iteration cap reached; `fallback` is the best available partial answer.
    pub fn max_iterations(max_iterations: u32, fallback: impl Into<String>) -> Self {
        Self {
            state: RunState::MaxIterations,
            answer: Some(fallback.into()),
            error: Some(format!(
                "Reached maximum iterations ({}) without a final answer",
                max_iterations
            )),
        }
    }

    pub fn llm_error(error: impl Into<String>) -> Self {
        Self {
            state: RunState::LlmError,
            answer: None,
            error: Some(error.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            state: RunState::Cancelled,
            answer: None,
            error: Some("Run cancelled".to_string()),
        }
    }
}

/// Terminal outcome of a run.
///
/// Every outcome has the same shape; callers only branch on `success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub strategy: String,
    pub success: bool,
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub iterations: u32,
    pub steps: Vec<AgentStep>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent Events
// ─────────────────────────────────────────────────────────────────────────────

/// An event emitted during a streamed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The run started.
    Start {
        run_id: RunId,
        strategy: String,
        query: String,
        max_iterations: u32,
    },
    /// A new reasoning iteration began.
    Iteration { iteration: u32 },
    /// A step was appended to the log.
    Step { step: AgentStep },
    /// A tool is about to execute.
    ToolStart { tool: String, input: Value },
    /// A tool finished.
    ToolEnd {
        tool: String,
        success: bool,
        output: Value,
    },
    /// The run ended.
    End { result: RunResult },
}

impl AgentEvent {
    /// Event type name as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Iteration { .. } => "iteration",
            Self::Step { .. } => "step",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::End { .. } => "end",
        }
    }
}

/// A boxed stream of run events.
pub type EventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send + 'static>>;

// ─────────────────────────────────────────────────────────────────────────────
// Run Recorder
// ─────────────────────────────────────────────────────────────────────────────

/// Mutable state of one run: its step log, iteration count, cancellation
/// token and optional event channel.
#[derive(Debug)]
pub struct RunRecorder {
    run_id: RunId,
    log: StepLog,
    iterations: u32,
    cancellation: CancellationToken,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl RunRecorder {
    /// A recorder that only keeps the log.
    pub fn new(run_id: RunId, cancellation: CancellationToken) -> Self {
        Self {
            run_id,
            log: StepLog::new(),
            iterations: 0,
            cancellation,
            events: None,
        }
    }

    /// A recorder that also emits events.
    pub fn streaming(
        run_id: RunId,
        cancellation: CancellationToken,
        events: mpsc::UnboundedSender<AgentEvent>,
    ) -> Self {
        Self {
            events: Some(events),
            ..Self::new(run_id, cancellation)
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn log(&self) -> &StepLog {
        &self.log
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Context handed to tools executed in this run.
    pub fn tool_context(&self) -> ToolContext {
        ToolContext::with_cancellation(self.run_id, self.cancellation.clone())
    }

    pub(crate) fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            // Receiver gone: its drop guard has already cancelled the run.
            let _ = tx.send(event);
        }
    }

    /// Start the next iteration and return its number (1-based).
    pub fn begin_iteration(&mut self) -> u32 {
        self.iterations += 1;
        tracing::debug!(run_id = %self.run_id, iteration = self.iterations, "Iteration started");
        self.emit(AgentEvent::Iteration {
            iteration: self.iterations,
        });
        self.iterations
    }

    /// Append a step and emit it.
    pub fn record(&mut self, step: AgentStep) {
        tracing::trace!(run_id = %self.run_id, step_type = %step.step_type, "Step recorded");
        if self.events.is_some() {
            self.emit(AgentEvent::Step { step: step.clone() });
        }
        self.log.push(step);
    }

    pub fn tool_start(&self, tool: &str, input: &Value) {
        self.emit(AgentEvent::ToolStart {
            tool: tool.to_string(),
            input: input.clone(),
        });
    }

    pub fn tool_end(&self, tool: &str, success: bool, output: &Value) {
        self.emit(AgentEvent::ToolEnd {
            tool: tool.to_string(),
            success,
            output: output.clone(),
        });
    }

    /// Close the run, emit `end` and return the result.
    pub fn finish(self, strategy: &str, termination: Termination) -> RunResult {
        let result = RunResult {
            run_id: self.run_id,
            strategy: strategy.to_string(),
            success: termination.state.is_success(),
            state: termination.state,
            answer: termination.answer,
            error: termination.error,
            iterations: self.iterations,
            steps: self.log.into_steps(),
        };
        if let Some(tx) = self.events {
            let _ = tx.send(AgentEvent::End {
                result: result.clone(),
            });
        }
        result
    }
}
