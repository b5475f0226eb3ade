//! Sequential pipeline executor.
//!
//! Nodes run one after another in declared order. Each node sees the
//! contributions of every node before it; its own contribution is added to
//! the context under its id once it returns.

use std::collections::HashSet;
use std::time::Instant;

use corvid_agent::CancellationToken;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::context::{INITIAL_INPUT, NodeContext};
use crate::error::{PipelineError, Result};
use crate::node::Node;

/// Wall-clock time spent in one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeTiming {
    pub node: String,
    pub kind: &'static str,
    pub duration_ms: u64,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub pipeline: String,
    /// The full context, including `_initial_input`.
    pub context: NodeContext,
    pub timings: Vec<NodeTiming>,
    /// `final_result` of the last output node, if any.
    pub final_result: Option<Value>,
}

/// An ordered list of nodes sharing one context per run.
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    nodes: Vec<Box<dyn Node>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: impl Node + 'static) -> Self {
        self.nodes.push(Box::new(node));
        self
    }

    pub fn push(&mut self, node: Box<dyn Node>) {
        self.nodes.push(node);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids in execution order.
    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id()).collect()
    }

    /// Check that the pipeline has nodes and that ids are unique.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(PipelineError::invalid(format!(
                "pipeline '{}' has no nodes",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            let id = node.id();
            if id.is_empty() {
                return Err(PipelineError::invalid("node id cannot be empty"));
            }
            if id == INITIAL_INPUT {
                return Err(PipelineError::invalid(format!("node id '{id}' is reserved")));
            }
            if !seen.insert(id) {
                return Err(PipelineError::invalid(format!("duplicate node id '{id}'")));
            }
        }
        Ok(())
    }

    /// Run every node against a fresh context seeded with `input`.
    pub async fn run(&self, input: Value) -> Result<PipelineRun> {
        self.run_with_cancellation(input, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), checking `cancellation` before each node.
    ///
    /// Nodes see the token through [`NodeContext::cancellation`], so an agent
    /// node stops its run mid-way.
    pub async fn run_with_cancellation(
        &self,
        input: Value,
        cancellation: &CancellationToken,
    ) -> Result<PipelineRun> {
        self.validate()?;

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut context = NodeContext::new(input).with_cancellation(cancellation.clone());
        let mut timings = Vec::with_capacity(self.nodes.len());
        let mut final_result = None;

        tracing::info!(%run_id, pipeline = %self.name, nodes = self.nodes.len(), "Pipeline started");

        for node in &self.nodes {
            if cancellation.is_cancelled() {
                tracing::info!(%run_id, node = node.id(), "Pipeline cancelled");
                return Err(PipelineError::Cancelled);
            }

            let node_started = Instant::now();
            let output = node.execute(&context).await.inspect_err(|e| {
                tracing::warn!(%run_id, node = node.id(), kind = node.kind(), error = %e, "Node failed");
            })?;
            let duration_ms = node_started.elapsed().as_millis() as u64;

            let contribution = take_contribution(node.as_ref(), output)?;
            if node.kind() == "output" {
                final_result = contribution.get("final_result").cloned();
            }
            context.insert(node.id(), contribution)?;

            tracing::debug!(%run_id, node = node.id(), kind = node.kind(), duration_ms, "Node finished");
            timings.push(NodeTiming {
                node: node.id().to_string(),
                kind: node.kind(),
                duration_ms,
            });
        }

        tracing::info!(
            %run_id,
            pipeline = %self.name,
            duration_ms = started.elapsed().as_millis() as u64,
            "Pipeline finished"
        );

        Ok(PipelineRun {
            run_id,
            pipeline: self.name.clone(),
            context,
            timings,
            final_result,
        })
    }
}

/// Unwrap `{id: contribution}`, rejecting anything keyed otherwise.
fn take_contribution(node: &dyn Node, output: Value) -> Result<Value> {
    let Value::Object(mut map) = output else {
        return Err(PipelineError::node_failed(node.id(), "output is not an object"));
    };
    if map.len() != 1 {
        return Err(PipelineError::node_failed(
            node.id(),
            format!("expected one contribution, got {}", map.len()),
        ));
    }
    map.remove(node.id()).ok_or_else(|| {
        PipelineError::node_failed(node.id(), "contribution is not keyed by the node id")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{AgentNode, InputNode, OutputNode, TransformNode, TransformOp};
    use async_trait::async_trait;
    use corvid_agent::{Agent, AgentConfig, CalculatorTool};
    use corvid_llm::{LlmBackend, MockBackend};
    use std::sync::Arc;
    use serde_json::json;

    /// Writes under someone else's id.
    struct Impostor;

    #[async_trait]
    impl Node for Impostor {
        fn id(&self) -> &str {
            "impostor"
        }

        fn kind(&self) -> &'static str {
            "test"
        }

        async fn run(&self, _ctx: &NodeContext) -> Result<Value> {
            Ok(json!({}))
        }

        async fn execute(&self, _ctx: &NodeContext) -> Result<Value> {
            Ok(json!({"input": {"question": "overwritten"}}))
        }
    }

    fn simple() -> Pipeline {
        Pipeline::new("echo")
            .with_node(InputNode::new("input").with_field("question"))
            .with_node(TransformNode::new("copy", "input", TransformOp::Passthrough))
            .with_node(OutputNode::new("output", "copy.question"))
    }

    #[tokio::test]
    async fn test_runs_nodes_in_order() {
        let run = simple().run(json!({"question": "hi"})).await.unwrap();

        assert_eq!(run.final_result, Some(json!("hi")));
        assert_eq!(run.pipeline, "echo");
        let order: Vec<_> = run.timings.iter().map(|t| t.node.as_str()).collect();
        assert_eq!(order, vec!["input", "copy", "output"]);
        assert_eq!(run.context.get("copy"), Some(&json!({"question": "hi"})));
        assert_eq!(run.context.initial_input(), &json!({"question": "hi"}));
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let pipeline = Pipeline::new("dup")
            .with_node(InputNode::new("a"))
            .with_node(InputNode::new("a"));
        let err = pipeline.run(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("duplicate node id 'a'"));
    }

    #[tokio::test]
    async fn test_empty_pipeline_rejected() {
        assert!(Pipeline::new("empty").run(json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_node_cannot_write_another_entry() {
        let pipeline = Pipeline::new("bad")
            .with_node(InputNode::new("input").with_field("question"))
            .with_node(Impostor);
        let err = pipeline.run(json!({"question": "q"})).await.unwrap_err();
        assert!(matches!(err, PipelineError::NodeFailed { ref node, .. } if node == "impostor"));
    }

    #[tokio::test]
    async fn test_failed_node_stops_the_run() {
        let pipeline = Pipeline::new("broken")
            .with_node(OutputNode::new("output", "missing.field"));
        let err = pipeline.run(json!({})).await.unwrap_err();
        assert!(matches!(err, PipelineError::PathNotFound { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let err = simple()
            .run_with_cancellation(json!({"question": "hi"}), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    struct SlowBackend(Arc<MockBackend>);

    #[async_trait]
    impl LlmBackend for SlowBackend {
        async fn complete(
            &self,
            request: corvid_llm::CompletionRequest,
        ) -> corvid_llm::Result<corvid_llm::CompletionResponse> {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.0.complete(request).await
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_cancel_reaches_running_agent_node() {
        let mock = Arc::new(MockBackend::repeating(
            "Action: calculator\nAction Input: {\"expression\": \"1 + 1\"}",
        ));
        let agent = Agent::builder()
            .with_backend(SlowBackend(Arc::clone(&mock)))
            .with_tool(CalculatorTool::new())
            .with_config(AgentConfig::default().with_max_iterations(200))
            .build()
            .unwrap();
        let pipeline = Pipeline::new("agentic")
            .with_node(InputNode::new("input").with_field("question"))
            .with_node(AgentNode::new("agent", "input.question", agent));

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(40)).await;
            canceller.cancel();
        });

        let run = pipeline
            .run_with_cancellation(json!({"question": "count forever"}), &token)
            .await
            .unwrap();

        let contribution = run.context.get("agent").unwrap();
        assert_eq!(contribution["state"], "cancelled");
        assert_eq!(contribution["success"], false);
        assert!(mock.request_count() < 200);
    }
}
