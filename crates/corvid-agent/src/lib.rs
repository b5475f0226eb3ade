//! Agent core for Corvid.
//!
//! This crate turns a natural-language request into a bounded sequence of
//! reasoning and tool steps, dispatching actions to a registry of
//! capability-scoped tools and streaming every step to the caller.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Agent                                                      │
//! │  - Run identity, start/end events, run_stream / run         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ReasoningStrategy: React | Structured | PlanExecute        │
//! │  - drives the loop, records steps into a RunRecorder        │
//! └─────────────────────────────────────────────────────────────┘
//!              │                               │
//!              ▼                               ▼
//!       ┌────────────┐                  ┌──────────────┐
//!       │ LlmBackend │                  │ ToolRegistry │
//!       │(corvid-llm)│                  │ + built-ins  │
//!       └────────────┘                  └──────────────┘
//! ```
//!
//! # Core Components
//!
//! - [`Agent`]: runs a strategy and streams [`AgentEvent`]s
//! - [`ToolRegistry`]: validated, failure-bounded tool dispatch
//! - [`StepLog`]: the ordered thought/action/observation record of a run
//! - [`RunResult`]: the single terminal shape for every outcome

pub mod agent;
pub mod error;
pub mod parser;
pub mod step;
pub mod strategies;
pub mod strategy;
pub mod stream;
pub mod tool;
pub mod tools;
pub mod types;

// Re-export core types
pub use error::{AgentError, Result};
pub use types::{AgentConfig, DEFAULT_MAX_ITERATIONS, RunId, StrategyKind};

// Re-export tool types
pub use tool::{
    ParamExt, ParamResult, ParamType, ParameterValidationError, Tool, ToolContext,
    ToolDescriptor, ToolParameter, ToolRegistry, ToolResult, validate_parameters,
};

// Re-export output sanitization types
pub use tool::{
    DEFAULT_MAX_OUTPUT_SIZE, OutputConfig, OutputSanitizationError, sanitize_output,
    validate_json_output,
};

// Re-export agent
pub use agent::{Agent, AgentBuilder};

// Re-export steps and streaming
pub use step::{AgentStep, StepLog, StepType};
pub use stream::{AgentEvent, EventStream, RunRecorder, RunResult, RunState, Termination};

// Re-export strategies
pub use strategies::{PlanExecuteStrategy, ReactStrategy, StructuredStrategy};
pub use strategy::ReasoningStrategy;

// Re-export parsing
pub use parser::{ActionInput, ParsedAction, ReactOutput, parse_plan, parse_react_output};

// Re-export built-in tools
pub use tools::{
    BuiltinToolsConfig, CalculatorTool, DateTimeTool, HttpRequestTool, HttpToolConfig,
    RetrievalServices, SqlBackend, SqlQueryTool, StatisticsTool, TextToSqlTool,
    VectorSearchTool, builtin_registry, register_builtin_tools,
};

pub use tokio_util::sync::CancellationToken;
