//! Core Agent implementation.
//!
//! The [`Agent`] wraps a [`ReasoningStrategy`] with run identity, start/end
//! events and logging. `run_stream` spawns the strategy as its own task and
//! yields events as they happen; `run` drains that stream and returns the
//! terminal result, so both entry points share one implementation.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use corvid_llm::{LlmBackend, SharedBackend};

use crate::error::{AgentError, Result};
use crate::strategies::{PlanExecuteStrategy, ReactStrategy, StructuredStrategy};
use crate::strategy::ReasoningStrategy;
use crate::stream::{AgentEvent, EventStream, RunRecorder, RunResult, RunState};
use crate::tool::{Tool, ToolRegistry};
use crate::types::{AgentConfig, RunId, StrategyKind};

// ─────────────────────────────────────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────────────────────────────────────

/// An agent: one reasoning strategy over one tool registry.
///
/// Cheap to clone and safe to share across concurrent runs.
#[derive(Clone)]
pub struct Agent {
    strategy: Arc<dyn ReasoningStrategy>,
    tools: Arc<ToolRegistry>,
}

impl Agent {
    /// Create an agent from a strategy and the registry it uses.
    pub fn new(strategy: Arc<dyn ReasoningStrategy>, tools: Arc<ToolRegistry>) -> Self {
        Self { strategy, tools }
    }

    /// Create an agent builder for fluent construction.
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// The strategy driving this agent.
    pub fn strategy(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Get the tool registry.
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run a query, streaming one event per step transition.
    ///
    /// The stream always ends with exactly one `end` event carrying the
    /// [`RunResult`]. Dropping the stream cancels the run before its next
    /// LLM call.
    pub fn run_stream(
        &self,
        query: impl Into<String>,
        cancellation: CancellationToken,
    ) -> EventStream {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let run_token = cancellation.child_token();
        let on_drop = run_token.clone().drop_guard();
        let recorder = RunRecorder::streaming(RunId::new(), run_token, tx);
        let strategy = Arc::clone(&self.strategy);
        let query = query.into();

        tokio::spawn(async move {
            execute_run(strategy.as_ref(), &query, recorder).await;
        });

        Box::pin(async_stream::stream! {
            let _on_drop = on_drop;
            while let Some(event) = rx.recv().await {
                yield event;
            }
        })
    }

    /// Run a query to completion.
    pub async fn run(&self, query: impl Into<String>, cancellation: CancellationToken) -> RunResult {
        let mut stream = self.run_stream(query, cancellation);
        let mut run_id = None;

        while let Some(event) = stream.next().await {
            match event {
                AgentEvent::Start { run_id: id, .. } => run_id = Some(id),
                AgentEvent::End { result } => return result,
                _ => {}
            }
        }

        // The run task died before emitting `end`
        let run_id = run_id.unwrap_or_default();
        tracing::error!(%run_id, "Run ended without a result");
        RunResult {
            run_id,
            strategy: self.strategy.kind().to_string(),
            success: false,
            state: RunState::LlmError,
            answer: None,
            error: Some("Run ended before producing a result".to_string()),
            iterations: 0,
            steps: Vec::new(),
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("strategy", &self.strategy.kind())
            .field("tools", &self.tools)
            .finish()
    }
}

async fn execute_run(
    strategy: &dyn ReasoningStrategy,
    query: &str,
    mut recorder: RunRecorder,
) -> RunResult {
    let run_id = recorder.run_id();
    let kind = strategy.kind();
    let max_iterations = strategy.max_iterations();

    recorder.emit(AgentEvent::Start {
        run_id,
        strategy: kind.to_string(),
        query: query.to_string(),
        max_iterations,
    });
    tracing::info!(
        %run_id,
        strategy = %kind,
        max_iterations,
        query_len = query.len(),
        "Run started"
    );

    let started = Instant::now();
    let termination = strategy.drive(query, &mut recorder).await;
    let result = recorder.finish(kind.as_str(), termination);

    tracing::info!(
        %run_id,
        strategy = %kind,
        success = result.success,
        state = ?result.state,
        iterations = result.iterations,
        steps = result.steps.len(),
        duration_ms = started.elapsed().as_millis() as u64,
        "Run finished"
    );
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`Agent`].
#[derive(Default)]
pub struct AgentBuilder {
    backend: Option<SharedBackend>,
    tools: ToolRegistry,
    config: AgentConfig,
    strategy: StrategyKind,
}

impl AgentBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the LLM backend.
    pub fn with_backend(mut self, backend: impl LlmBackend + 'static) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Set the LLM backend from a shared reference.
    pub fn with_shared_backend(mut self, backend: SharedBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the tool registry.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Register a single tool.
    pub fn with_tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.register(tool);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Choose the reasoning strategy.
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Build the agent.
    pub fn build(self) -> Result<Agent> {
        let backend = self
            .backend
            .ok_or_else(|| AgentError::config("LLM backend is required"))?;
        let tools = Arc::new(self.tools);

        let strategy: Arc<dyn ReasoningStrategy> = match self.strategy {
            StrategyKind::React => Arc::new(ReactStrategy::new(backend, tools.clone(), self.config)),
            StrategyKind::Structured => {
                Arc::new(StructuredStrategy::new(backend, tools.clone(), self.config))
            }
            StrategyKind::Plan => {
                Arc::new(PlanExecuteStrategy::new(backend, tools.clone(), self.config))
            }
        };

        Ok(Agent::new(strategy, tools))
    }
}
