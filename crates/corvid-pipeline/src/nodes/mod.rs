//! Built-in node types.

mod agent;
mod completion;
mod input;
mod output;
mod retrieval;
mod transform;

pub use agent::AgentNode;
pub use completion::{CompletionNode, context_block};
pub use input::InputNode;
pub use output::OutputNode;
pub use retrieval::{
    DEFAULT_TOP_K, REASON_EMBEDDING_FAILED, REASON_SEARCH_FAILED, REASON_UNAVAILABLE,
    RetrievalNode,
};
pub use transform::{TransformNode, TransformOp};
