//! Output node: names the pipeline's result.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::context::NodeContext;
use crate::error::Result;
use crate::node::Node;

/// Copies an upstream value into `{final_result: ...}`.
#[derive(Debug, Clone)]
pub struct OutputNode {
    id: String,
    source_path: String,
}

impl OutputNode {
    pub fn new(id: impl Into<String>, source_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_path: source_path.into(),
        }
    }
}

#[async_trait]
impl Node for OutputNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "output"
    }

    async fn run(&self, ctx: &NodeContext) -> Result<Value> {
        let value = ctx.resolve(&self.source_path)?;
        Ok(json!({ "final_result": value }))
    }
}
