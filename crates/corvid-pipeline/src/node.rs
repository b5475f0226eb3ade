//! The node contract.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::NodeContext;
use crate::error::Result;

/// One unit of a pipeline.
///
/// A node reads whatever it needs from the shared [`NodeContext`] and
/// returns its own contribution. It never sees a mutable context, so it
/// cannot touch another node's entry.
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique id within the pipeline; the key of this node's contribution.
    fn id(&self) -> &str;

    /// Node type name (`input`, `retrieval`, ...).
    fn kind(&self) -> &'static str;

    /// Produce this node's contribution.
    async fn run(&self, ctx: &NodeContext) -> Result<Value>;

    /// Produce `{id: contribution}`.
    async fn execute(&self, ctx: &NodeContext) -> Result<Value> {
        let contribution = self.run(ctx).await?;
        let mut out = Map::new();
        out.insert(self.id().to_string(), contribution);
        Ok(Value::Object(out))
    }
}

impl std::fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}
