//! Completion, embedding and vector search clients for Corvid.
//!
//! The agent engine depends only on the *shape* of a completion call: a list
//! of role-tagged messages in, a message (text and/or structured tool calls)
//! out. Providers implement [`LlmBackend`]; retrieval providers implement
//! [`Embedder`] and [`VectorIndex`].
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  LlmBackend trait                       │
//! │  - complete() -> CompletionResponse     │
//! └─────────────────────────────────────────┘
//!                    │
//!          ┌─────────┴─────────┐
//!          ▼                   ▼
//!   ┌────────────┐      ┌─────────────┐
//!   │ OpenAiBackend│    │ MockBackend │
//!   └────────────┘      └─────────────┘
//! ```

pub mod backend;
pub mod embeddings;
pub mod error;
pub mod openai;
pub mod retrieval;
pub mod types;

pub use backend::{LlmBackend, SharedBackend, with_retry};
pub use error::{LlmError, Result};
pub use types::{
    CompletionRequest, CompletionResponse, FinishReason, Message, Role, ToolCall, ToolDefinition,
    Usage,
};

#[cfg(any(test, feature = "testing"))]
pub use backend::MockBackend;

// Re-export embeddings and search
pub use embeddings::{
    Embedder, MockEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig, SharedEmbedder,
    cosine_similarity,
};
pub use retrieval::{
    HttpVectorIndex, InMemoryVectorIndex, SearchHit, SharedVectorIndex, VectorIndex,
};

// Re-export provider configs
pub use openai::{OpenAiBackend, OpenAiConfig, build_http_client, create_shared_backend};
