//! Agent node: runs a reasoning strategy as one pipeline step.

use async_trait::async_trait;
use corvid_agent::Agent;
use serde_json::Value;

use crate::context::{NodeContext, value_to_string};
use crate::error::{PipelineError, Result};
use crate::node::Node;

/// Contributes the serialized run result
/// (`{run_id, strategy, success, state, answer|error, iterations, steps}`).
///
/// A run that ends without an answer is still a contribution; downstream
/// nodes branch on `success`. The run is cancelled with the pipeline run.
#[derive(Debug, Clone)]
pub struct AgentNode {
    id: String,
    query_path: String,
    agent: Agent,
}

impl AgentNode {
    pub fn new(id: impl Into<String>, query_path: impl Into<String>, agent: Agent) -> Self {
        Self {
            id: id.into(),
            query_path: query_path.into(),
            agent,
        }
    }
}

#[async_trait]
impl Node for AgentNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "agent"
    }

    async fn run(&self, ctx: &NodeContext) -> Result<Value> {
        let query = value_to_string(ctx.resolve(&self.query_path)?);
        let result = self.agent.run(query, ctx.cancellation().child_token()).await;

        tracing::debug!(
            node = %self.id,
            run_id = %result.run_id,
            success = result.success,
            iterations = result.iterations,
            "Agent run finished"
        );

        serde_json::to_value(&result).map_err(|e| PipelineError::node_failed(&self.id, e.to_string()))
    }
}
