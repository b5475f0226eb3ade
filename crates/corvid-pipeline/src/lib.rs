//! Workflow node executor for Corvid.
//!
//! A pipeline is an ordered list of nodes sharing one [`NodeContext`]. Each
//! node reads any earlier contribution (or the caller's `_initial_input`)
//! and adds exactly one entry keyed by its own id.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  PipelineDefinition (TOML / JSON)                       │
//! │  - validate: unique ids, paths read earlier nodes only  │
//! │  - build against NodeServices (LLM, retrieval, tools)   │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │  Pipeline                                               │
//! │  - runs nodes in order, timing each one                 │
//! │  - input → retrieval → completion | agent → output      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Retrieval is optional: when the embedder or vector index is missing or
//! fails, the retrieval node contributes a result flagged `fallback: true`
//! and the [`DegradationMonitor`] counts it.

pub mod context;
pub mod definition;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod node;
pub mod nodes;

pub use context::{INITIAL_INPUT, NodeContext, value_to_string};
pub use definition::{NodeDefinition, NodeServices, PipelineDefinition};
pub use error::{PipelineError, Result};
pub use executor::{NodeTiming, Pipeline, PipelineRun};
pub use metrics::{DEFAULT_ALERT_THRESHOLD, DegradationMonitor, DegradationSnapshot};
pub use node::Node;
pub use nodes::{
    AgentNode, CompletionNode, InputNode, OutputNode, REASON_EMBEDDING_FAILED,
    REASON_SEARCH_FAILED, REASON_UNAVAILABLE, RetrievalNode, TransformNode, TransformOp,
    context_block,
};
