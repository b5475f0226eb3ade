//! Declarative pipeline definitions.
//!
//! Pipelines are described in TOML (or JSON) and built against a
//! [`NodeServices`] bundle holding the shared backends.
//!
//! # Example TOML
//!
//! ```toml
//! name = "rag_answer"
//! description = "Retrieve supporting documents, then answer"
//!
//! [[nodes]]
//! id = "input"
//! type = "input"
//! field = "question"
//!
//! [[nodes]]
//! id = "retrieve"
//! type = "retrieval"
//! query_path = "input.question"
//! top_k = 3
//! min_score = 0.2
//!
//! [[nodes]]
//! id = "answer"
//! type = "completion"
//! input_path = "input.question"
//! context_path = "retrieve"
//!
//! [[nodes]]
//! id = "output"
//! type = "output"
//! source_path = "answer.text"
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use corvid_agent::{
    Agent, AgentConfig, PlanExecuteStrategy, ReactStrategy, ReasoningStrategy, StrategyKind,
    StructuredStrategy, ToolRegistry,
};
use corvid_llm::{SharedBackend, SharedEmbedder, SharedVectorIndex};
use serde::{Deserialize, Serialize};

use crate::context::{INITIAL_INPUT, template_paths};
use crate::error::{PipelineError, Result};
use crate::executor::Pipeline;
use crate::metrics::DegradationMonitor;
use crate::node::Node;
use crate::nodes::{
    AgentNode, CompletionNode, DEFAULT_TOP_K, InputNode, OutputNode, RetrievalNode,
    TransformNode, TransformOp,
};

/// A complete pipeline definition.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PipelineDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Nodes in execution order.
    pub nodes: Vec<NodeDefinition>,
}

/// One node, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeDefinition {
    Input {
        id: String,
        #[serde(default)]
        field: Option<String>,
    },
    Retrieval {
        id: String,
        query_path: String,
        /// Defaults to the services' collection.
        #[serde(default)]
        collection: Option<String>,
        #[serde(default)]
        top_k: Option<usize>,
        #[serde(default)]
        min_score: Option<f32>,
    },
    Completion {
        id: String,
        input_path: String,
        #[serde(default)]
        context_path: Option<String>,
        #[serde(default)]
        system: Option<String>,
        #[serde(default)]
        prompt: Option<String>,
        #[serde(default)]
        max_tokens: Option<u32>,
        #[serde(default)]
        temperature: Option<f32>,
    },
    Agent {
        id: String,
        query_path: String,
        #[serde(default)]
        strategy: Option<StrategyKind>,
        #[serde(default)]
        max_iterations: Option<u32>,
    },
    Transform {
        id: String,
        source_path: String,
        #[serde(default)]
        operation: TransformOp,
    },
    Output {
        id: String,
        source_path: String,
    },
}

impl NodeDefinition {
    pub fn id(&self) -> &str {
        match self {
            Self::Input { id, .. }
            | Self::Retrieval { id, .. }
            | Self::Completion { id, .. }
            | Self::Agent { id, .. }
            | Self::Transform { id, .. }
            | Self::Output { id, .. } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input { .. } => "input",
            Self::Retrieval { .. } => "retrieval",
            Self::Completion { .. } => "completion",
            Self::Agent { .. } => "agent",
            Self::Transform { .. } => "transform",
            Self::Output { .. } => "output",
        }
    }

    /// Context paths this node reads, including template placeholders.
    pub fn reads(&self) -> Vec<String> {
        match self {
            Self::Input { field, .. } => field
                .as_ref()
                .map(|f| format!("{INITIAL_INPUT}.{f}"))
                .into_iter()
                .collect(),
            Self::Retrieval { query_path, .. } => vec![query_path.clone()],
            Self::Completion {
                input_path,
                context_path,
                system,
                prompt,
                ..
            } => {
                let mut paths = Vec::new();
                if prompt.is_none() {
                    paths.push(input_path.clone());
                }
                paths.extend(context_path.iter().cloned());
                for template in system.iter().chain(prompt.iter()) {
                    paths.extend(template_paths(template));
                }
                paths
            }
            Self::Agent { query_path, .. } => vec![query_path.clone()],
            Self::Transform { source_path, .. } | Self::Output { source_path, .. } => {
                vec![source_path.clone()]
            }
        }
    }
}

/// Root of a context path: the part before the first `.` or `[`.
fn path_root(path: &str) -> &str {
    let path = path.trim();
    let end = path.find(['.', '[']).unwrap_or(path.len());
    &path[..end]
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

impl PipelineDefinition {
    /// Parse a definition from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| PipelineError::invalid(format!("TOML parse error: {e}")))
    }

    /// Parse a definition from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| PipelineError::invalid(format!("JSON parse error: {e}")))
    }

    /// Load a definition file; `.json` files are JSON, anything else TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl PipelineDefinition {
    /// Validate the definition.
    ///
    /// Checks:
    /// - A non-empty name and at least one node
    /// - Node ids are non-empty, unique, free of `.`/`[` and not reserved
    /// - Every path a node reads is rooted at `_initial_input` or an
    ///   earlier node
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::invalid("Pipeline name cannot be empty"));
        }
        if self.nodes.is_empty() {
            return Err(PipelineError::invalid(format!(
                "Pipeline '{}' must have at least one node",
                self.name
            )));
        }

        let mut earlier: HashSet<&str> = HashSet::new();
        for node in &self.nodes {
            let id = node.id();
            if id.trim().is_empty() {
                return Err(PipelineError::invalid("Node ID cannot be empty"));
            }
            if id == INITIAL_INPUT {
                return Err(PipelineError::invalid(format!("Node ID '{id}' is reserved")));
            }
            if id.contains(['.', '[', ']']) {
                return Err(PipelineError::invalid(format!(
                    "Node ID '{id}' cannot contain '.', '[' or ']'"
                )));
            }
            if earlier.contains(id) {
                return Err(PipelineError::invalid(format!("Duplicate node ID: {id}")));
            }

            for path in node.reads() {
                let root = path_root(&path);
                if root != INITIAL_INPUT && !earlier.contains(root) {
                    return Err(PipelineError::invalid(format!(
                        "Node '{id}' reads '{path}', but '{root}' is not an earlier node"
                    )));
                }
            }
            earlier.insert(id);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// Shared services nodes are built against.
#[derive(Clone)]
pub struct NodeServices {
    pub llm: Option<SharedBackend>,
    pub embedder: Option<SharedEmbedder>,
    pub index: Option<SharedVectorIndex>,
    /// Collection used by retrieval nodes that do not name one.
    pub collection: String,
    pub top_k: usize,
    pub tools: Arc<ToolRegistry>,
    /// Model, token and iteration defaults for completion and agent nodes.
    pub agent_config: AgentConfig,
    pub monitor: Arc<DegradationMonitor>,
}

impl NodeServices {
    pub fn new() -> Self {
        Self {
            llm: None,
            embedder: None,
            index: None,
            collection: "documents".to_string(),
            top_k: DEFAULT_TOP_K,
            tools: Arc::new(ToolRegistry::new()),
            agent_config: AgentConfig::default(),
            monitor: Arc::new(DegradationMonitor::default()),
        }
    }

    pub fn with_llm(mut self, llm: SharedBackend) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_retrieval(mut self, embedder: SharedEmbedder, index: SharedVectorIndex) -> Self {
        self.embedder = Some(embedder);
        self.index = Some(index);
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>, top_k: usize) -> Self {
        self.collection = collection.into();
        self.top_k = top_k;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn with_agent_config(mut self, config: AgentConfig) -> Self {
        self.agent_config = config;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<DegradationMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    fn llm_for(&self, node: &str) -> Result<SharedBackend> {
        self.llm.clone().ok_or_else(|| PipelineError::MissingService {
            node: node.to_string(),
            service: "an LLM backend",
        })
    }
}

impl Default for NodeServices {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NodeServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeServices")
            .field("llm", &self.llm.as_ref().map(|b| b.name().to_string()))
            .field("embedder", &self.embedder.as_ref().map(|e| e.name().to_string()))
            .field("index", &self.index.as_ref().map(|i| i.name().to_string()))
            .field("collection", &self.collection)
            .field("tools", &self.tools.names())
            .finish_non_exhaustive()
    }
}

impl PipelineDefinition {
    /// Validate and build an executable [`Pipeline`].
    pub fn build(&self, services: &NodeServices) -> Result<Pipeline> {
        self.validate()?;

        let mut pipeline = Pipeline::new(&self.name);
        for node in &self.nodes {
            pipeline.push(build_node(node, services)?);
        }
        tracing::debug!(pipeline = %self.name, nodes = pipeline.len(), "Pipeline built");
        Ok(pipeline)
    }
}

fn build_node(definition: &NodeDefinition, services: &NodeServices) -> Result<Box<dyn Node>> {
    let node: Box<dyn Node> = match definition {
        NodeDefinition::Input { id, field } => {
            let node = InputNode::new(id);
            Box::new(match field {
                Some(field) => node.with_field(field),
                None => node,
            })
        }

        NodeDefinition::Retrieval {
            id,
            query_path,
            collection,
            top_k,
            min_score,
        } => {
            let collection = collection.as_deref().unwrap_or(&services.collection);
            let mut node =
                RetrievalNode::new(id, query_path, collection, Arc::clone(&services.monitor))
                    .with_top_k(top_k.unwrap_or(services.top_k));
            if let (Some(embedder), Some(index)) = (&services.embedder, &services.index) {
                node = node.with_services(Arc::clone(embedder), Arc::clone(index));
            }
            if let Some(min_score) = min_score {
                node = node.with_min_score(*min_score);
            }
            Box::new(node)
        }

        NodeDefinition::Completion {
            id,
            input_path,
            context_path,
            system,
            prompt,
            max_tokens,
            temperature,
        } => {
            let config = &services.agent_config;
            let mut node = CompletionNode::new(id, services.llm_for(id)?, &config.model, input_path)
                .with_max_tokens(max_tokens.unwrap_or(config.max_tokens))
                .with_retries(config.llm_retries, config.retry_backoff);
            if let Some(temperature) = temperature.or(config.temperature) {
                node = node.with_temperature(temperature);
            }
            if let Some(path) = context_path {
                node = node.with_context_path(path);
            }
            if let Some(system) = system {
                node = node.with_system(system);
            }
            if let Some(prompt) = prompt {
                node = node.with_prompt(prompt);
            }
            Box::new(node)
        }

        NodeDefinition::Agent {
            id,
            query_path,
            strategy,
            max_iterations,
        } => {
            let backend = services.llm_for(id)?;
            let mut config = services.agent_config.clone();
            if let Some(max) = max_iterations {
                config.max_iterations = *max;
            }
            let tools = Arc::clone(&services.tools);
            let strategy: Arc<dyn ReasoningStrategy> = match strategy.unwrap_or_default() {
                StrategyKind::React => Arc::new(ReactStrategy::new(backend, tools.clone(), config)),
                StrategyKind::Structured => {
                    Arc::new(StructuredStrategy::new(backend, tools.clone(), config))
                }
                StrategyKind::Plan => {
                    Arc::new(PlanExecuteStrategy::new(backend, tools.clone(), config))
                }
            };
            Box::new(AgentNode::new(id, query_path, Agent::new(strategy, tools)))
        }

        NodeDefinition::Transform {
            id,
            source_path,
            operation,
        } => Box::new(TransformNode::new(id, source_path, *operation)),

        NodeDefinition::Output { id, source_path } => Box::new(OutputNode::new(id, source_path)),
    };
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_llm::MockBackend;

    const RAG_TOML: &str = r#"
name = "rag_answer"
description = "Retrieve, then answer"

[[nodes]]
id = "input"
type = "input"
field = "question"

[[nodes]]
id = "retrieve"
type = "retrieval"
query_path = "input.question"
top_k = 3
min_score = 0.2

[[nodes]]
id = "answer"
type = "completion"
input_path = "input.question"
context_path = "retrieve"
system = "Answer from context."

[[nodes]]
id = "output"
type = "output"
source_path = "answer.text"
"#;

    #[test]
    fn test_parse_toml() {
        let def = PipelineDefinition::from_toml(RAG_TOML).unwrap();
        assert_eq!(def.name, "rag_answer");
        assert_eq!(def.nodes.len(), 4);
        assert_eq!(def.nodes[1].kind(), "retrieval");
        assert_eq!(
            def.nodes[1],
            NodeDefinition::Retrieval {
                id: "retrieve".into(),
                query_path: "input.question".into(),
                collection: None,
                top_k: Some(3),
                min_score: Some(0.2),
            }
        );
        def.validate().unwrap();
    }

    #[test]
    fn test_parse_json() {
        let def = PipelineDefinition::from_json(
            r#"{"name": "t", "nodes": [
                {"id": "input", "type": "input"},
                {"id": "texts", "type": "transform", "source_path": "input", "operation": "document_texts"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            def.nodes[1],
            NodeDefinition::Transform {
                id: "texts".into(),
                source_path: "input".into(),
                operation: TransformOp::DocumentTexts,
            }
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = PipelineDefinition::from_json(r#"{"name": "t", "nodes": [{"id": "x", "type": "shell"}]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("JSON parse error"));
    }

    #[test]
    fn test_validation_errors() {
        let mut def = PipelineDefinition::from_toml(RAG_TOML).unwrap();
        def.nodes.swap(0, 1);
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("'input' is not an earlier node"));

        let dup = PipelineDefinition {
            name: "dup".into(),
            description: String::new(),
            nodes: vec![
                NodeDefinition::Input { id: "a".into(), field: None },
                NodeDefinition::Input { id: "a".into(), field: None },
            ],
        };
        assert!(dup.validate().unwrap_err().to_string().contains("Duplicate node ID: a"));

        let reserved = PipelineDefinition {
            name: "r".into(),
            description: String::new(),
            nodes: vec![NodeDefinition::Input { id: INITIAL_INPUT.into(), field: None }],
        };
        assert!(reserved.validate().is_err());

        let empty = PipelineDefinition {
            name: "e".into(),
            description: String::new(),
            nodes: vec![],
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_template_paths_are_checked() {
        let def = PipelineDefinition::from_json(
            r#"{"name": "t", "nodes": [
                {"id": "answer", "type": "completion", "input_path": "_initial_input.q",
                 "prompt": "Use {{later.text}}"}
            ]}"#,
        )
        .unwrap();
        assert!(def.validate().unwrap_err().to_string().contains("later"));
    }

    #[test]
    fn test_build_requires_llm_for_completion() {
        let def = PipelineDefinition::from_toml(RAG_TOML).unwrap();
        let err = def.build(&NodeServices::new()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingService { ref node, .. } if node == "answer"));

        let services = NodeServices::new().with_llm(Arc::new(MockBackend::with_text("ok")));
        let pipeline = def.build(&services).unwrap();
        assert_eq!(pipeline.node_ids(), vec!["input", "retrieve", "answer", "output"]);
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("rag.toml");
        std::fs::write(&toml_path, RAG_TOML).unwrap();
        assert_eq!(PipelineDefinition::from_file(&toml_path).unwrap().name, "rag_answer");

        let json_path = dir.path().join("p.JSON");
        std::fs::write(&json_path, r#"{"name": "j", "nodes": [{"id": "i", "type": "input"}]}"#)
            .unwrap();
        assert_eq!(PipelineDefinition::from_file(&json_path).unwrap().name, "j");

        assert!(matches!(
            PipelineDefinition::from_file(&dir.path().join("missing.toml")),
            Err(PipelineError::Io(_))
        ));
    }
}
