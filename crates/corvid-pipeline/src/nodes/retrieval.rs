//! Retrieval node: embeds a query and searches a vector collection.
//!
//! Retrieval is optional. When the embedder or index is missing or fails,
//! the node returns an empty, flagged result instead of failing the
//! pipeline, and records the degradation in the shared monitor.

use std::sync::Arc;

use async_trait::async_trait;
use corvid_llm::{SearchHit, SharedEmbedder, SharedVectorIndex};
use serde_json::{Value, json};

use crate::context::{NodeContext, value_to_string};
use crate::error::Result;
use crate::metrics::DegradationMonitor;
use crate::node::Node;

/// No embedder or index is configured.
pub const REASON_UNAVAILABLE: &str = "retrieval_unavailable";
/// The embedder returned an error.
pub const REASON_EMBEDDING_FAILED: &str = "embedding_failed";
/// The vector index returned an error.
pub const REASON_SEARCH_FAILED: &str = "search_failed";

/// Default number of documents requested.
pub const DEFAULT_TOP_K: usize = 5;

pub struct RetrievalNode {
    id: String,
    query_path: String,
    collection: String,
    top_k: usize,
    min_score: Option<f32>,
    embedder: Option<SharedEmbedder>,
    index: Option<SharedVectorIndex>,
    monitor: Arc<DegradationMonitor>,
}

impl RetrievalNode {
    pub fn new(
        id: impl Into<String>,
        query_path: impl Into<String>,
        collection: impl Into<String>,
        monitor: Arc<DegradationMonitor>,
    ) -> Self {
        Self {
            id: id.into(),
            query_path: query_path.into(),
            collection: collection.into(),
            top_k: DEFAULT_TOP_K,
            min_score: None,
            embedder: None,
            index: None,
            monitor,
        }
    }

    pub fn with_services(mut self, embedder: SharedEmbedder, index: SharedVectorIndex) -> Self {
        self.embedder = Some(embedder);
        self.index = Some(index);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Drop hits scoring below `min_score`.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    fn degraded(&self, query: &str, reason: &'static str, error: Option<String>) -> Value {
        self.monitor.record(&self.id, reason);
        let mut out = json!({
            "query": query,
            "collection": self.collection,
            "documents": [],
            "count": 0,
            "fallback": true,
            "reason": reason,
        });
        if let Some(error) = error {
            out["error"] = Value::String(error);
        }
        out
    }
}

impl std::fmt::Debug for RetrievalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalNode")
            .field("id", &self.id)
            .field("query_path", &self.query_path)
            .field("collection", &self.collection)
            .field("top_k", &self.top_k)
            .field("min_score", &self.min_score)
            .field("configured", &(self.embedder.is_some() && self.index.is_some()))
            .finish()
    }
}

fn document(hit: SearchHit) -> Value {
    json!({
        "id": hit.id,
        "score": hit.score,
        "text": hit.text,
        "metadata": hit.metadata,
    })
}

#[async_trait]
impl Node for RetrievalNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "retrieval"
    }

    async fn run(&self, ctx: &NodeContext) -> Result<Value> {
        let query = value_to_string(ctx.resolve(&self.query_path)?);

        let (Some(embedder), Some(index)) = (&self.embedder, &self.index) else {
            tracing::debug!(node = %self.id, "No retrieval services configured");
            return Ok(self.degraded(&query, REASON_UNAVAILABLE, None));
        };

        let vector = match embedder.embed(&query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(node = %self.id, embedder = embedder.name(), error = %e, "Embedding failed");
                return Ok(self.degraded(&query, REASON_EMBEDDING_FAILED, Some(e.to_string())));
            }
        };

        let hits = match index.search(&self.collection, &vector, self.top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::debug!(node = %self.id, index = index.name(), error = %e, "Vector search failed");
                return Ok(self.degraded(&query, REASON_SEARCH_FAILED, Some(e.to_string())));
            }
        };

        let documents: Vec<Value> = hits
            .into_iter()
            .filter(|hit| self.min_score.is_none_or(|min| hit.score >= min))
            .map(document)
            .collect();

        tracing::debug!(
            node = %self.id,
            collection = %self.collection,
            count = documents.len(),
            "Retrieved documents"
        );

        Ok(json!({
            "query": query,
            "collection": self.collection,
            "count": documents.len(),
            "documents": documents,
            "fallback": false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_llm::{Embedder, InMemoryVectorIndex, LlmError, MockEmbedder};

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> corvid_llm::Result<Vec<f32>> {
            Err(LlmError::Network("connection refused".to_string()))
        }

        fn dimensions(&self) -> usize {
            8
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    async fn seeded_index(embedder: &MockEmbedder) -> Arc<InMemoryVectorIndex> {
        let index = InMemoryVectorIndex::new();
        for (id, text) in [("a", "rust ownership"), ("b", "python decorators")] {
            let vector = embedder.embed(text).await.unwrap();
            index.upsert("docs", id, text, vector, json!({"source": id}));
        }
        Arc::new(index)
    }

    fn ctx() -> NodeContext {
        NodeContext::new(json!({"question": "rust ownership"}))
    }

    #[tokio::test]
    async fn test_returns_documents() {
        let embedder = MockEmbedder::new(32);
        let index = seeded_index(&embedder).await;
        let node = RetrievalNode::new(
            "retrieve",
            "_initial_input.question",
            "docs",
            Arc::new(DegradationMonitor::default()),
        )
        .with_services(Arc::new(embedder), index)
        .with_top_k(2);

        let out = node.run(&ctx()).await.unwrap();
        assert_eq!(out["fallback"], false);
        assert_eq!(out["count"], 2);
        assert_eq!(out["documents"][0]["id"], "a");
        assert_eq!(out["documents"][0]["metadata"]["source"], "a");
    }

    #[tokio::test]
    async fn test_min_score_filters() {
        let embedder = MockEmbedder::new(32);
        let index = seeded_index(&embedder).await;
        let node = RetrievalNode::new(
            "retrieve",
            "_initial_input.question",
            "docs",
            Arc::new(DegradationMonitor::default()),
        )
        .with_services(Arc::new(embedder), index)
        .with_min_score(0.999);

        let out = node.run(&ctx()).await.unwrap();
        assert_eq!(out["count"], 1);
        assert_eq!(out["documents"][0]["text"], "rust ownership");
    }

    #[tokio::test]
    async fn test_unconfigured_degrades() {
        let monitor = Arc::new(DegradationMonitor::default());
        let node = RetrievalNode::new("retrieve", "_initial_input.question", "docs", monitor.clone());

        let out = node.run(&ctx()).await.unwrap();
        assert_eq!(out["fallback"], true);
        assert_eq!(out["reason"], REASON_UNAVAILABLE);
        assert_eq!(out["documents"], json!([]));
        assert_eq!(monitor.count(), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades() {
        let monitor = Arc::new(DegradationMonitor::default());
        let node = RetrievalNode::new("retrieve", "_initial_input.question", "docs", monitor.clone())
            .with_services(Arc::new(BrokenEmbedder), Arc::new(InMemoryVectorIndex::new()));

        let out = node.run(&ctx()).await.unwrap();
        assert_eq!(out["reason"], REASON_EMBEDDING_FAILED);
        assert!(out["error"].as_str().unwrap().contains("connection refused"));
        assert_eq!(monitor.count(), 1);
    }

    #[tokio::test]
    async fn test_search_failure_degrades() {
        let monitor = Arc::new(DegradationMonitor::default());
        let node = RetrievalNode::new("retrieve", "_initial_input.question", "missing", monitor.clone())
            .with_services(
                Arc::new(MockEmbedder::new(8)),
                Arc::new(InMemoryVectorIndex::new()),
            );

        let out = node.run(&ctx()).await.unwrap();
        assert_eq!(out["reason"], REASON_SEARCH_FAILED);
        assert_eq!(monitor.count(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_query_path_is_an_error() {
        let node = RetrievalNode::new(
            "retrieve",
            "input.question",
            "docs",
            Arc::new(DegradationMonitor::default()),
        );
        assert!(node.run(&ctx()).await.is_err());
    }
}
