//! Error types for the pipeline executor.

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while building or running a pipeline.
///
/// Degraded optional services are not errors; nodes report them inside their
/// contribution instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid pipeline definition.
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// A context path did not resolve.
    #[error("Context path '{path}' not found: {reason}")]
    PathNotFound { path: String, reason: String },

    /// A node id was written twice into one context.
    #[error("Node '{0}' already contributed to this context")]
    DuplicateContribution(String),

    /// A required service is not configured.
    #[error("Node '{node}' requires {service}, which is not configured")]
    MissingService { node: String, service: &'static str },

    /// Node execution failed.
    #[error("Node '{node}' failed: {message}")]
    NodeFailed { node: String, message: String },

    /// The run was cancelled between nodes.
    #[error("Pipeline cancelled")]
    Cancelled,

    /// Reading a definition file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidPipeline(msg.into())
    }

    pub fn node_failed(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NodeFailed {
            node: node.into(),
            message: message.into(),
        }
    }
}
