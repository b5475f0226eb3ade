//! Semantic search over the configured vector index.

use async_trait::async_trait;
use serde_json::{Value, json};

use corvid_llm::{SharedEmbedder, SharedVectorIndex};

use crate::error::Result;
use crate::tool::{
    ParamExt, ParamResult, ParamType, ParameterValidationError, Tool, ToolContext, ToolParameter,
    ToolResult, validate_parameters,
};

/// Hard cap on `top_k`.
pub const MAX_TOP_K: u64 = 50;

/// Tool that embeds a query and searches a collection.
#[derive(Clone)]
pub struct VectorSearchTool {
    embedder: SharedEmbedder,
    index: SharedVectorIndex,
    default_collection: String,
    default_top_k: u64,
}

impl VectorSearchTool {
    pub fn new(
        embedder: SharedEmbedder,
        index: SharedVectorIndex,
        default_collection: impl Into<String>,
        default_top_k: u64,
    ) -> Self {
        Self {
            embedder,
            index,
            default_collection: default_collection.into(),
            default_top_k: default_top_k.clamp(1, MAX_TOP_K),
        }
    }
}

impl std::fmt::Debug for VectorSearchTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorSearchTool")
            .field("embedder", &self.embedder.name())
            .field("index", &self.index.name())
            .field("default_collection", &self.default_collection)
            .finish()
    }
}

#[async_trait]
impl Tool for VectorSearchTool {
    fn name(&self) -> &str {
        "vector_search"
    }

    fn description(&self) -> &str {
        "Search the knowledge base for passages semantically similar to a query. Returns \
         the best matching documents with their similarity scores."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("query", ParamType::String, "What to search for"),
            ToolParameter::optional("collection", ParamType::String, "Collection to search"),
            ToolParameter::optional(
                "top_k",
                ParamType::Integer,
                "Number of results to return",
            ),
            ToolParameter::optional(
                "min_score",
                ParamType::Number,
                "Drop results scoring below this similarity",
            ),
        ]
    }

    fn validate(&self, args: &Value) -> ParamResult<()> {
        validate_parameters(&self.parameters(), args)?;
        if let Some(min_score) = args.get("min_score").and_then(Value::as_f64)
            && !(-1.0..=1.0).contains(&min_score)
        {
            return Err(ParameterValidationError::out_of_range(
                "min_score",
                min_score,
                "cosine similarity lies in [-1, 1]",
            ));
        }
        Ok(())
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let query = params.required_str("query")?;
        let collection = params
            .optional_str("collection")
            .unwrap_or(&self.default_collection);
        let top_k = params
            .optional_u64("top_k", self.default_top_k)
            .clamp(1, MAX_TOP_K) as usize;
        let min_score = params.get("min_score").and_then(Value::as_f64);

        let vector = match self.embedder.embed(query).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(run_id = %ctx.run_id, error = %e, "Embedding failed");
                return Ok(ToolResult::error(format!("Embedding failed: {e}")));
            }
        };
        let hits = match self.index.search(collection, &vector, top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(run_id = %ctx.run_id, collection, error = %e, "Vector search failed");
                return Ok(ToolResult::error(format!("Search failed: {e}")));
            }
        };

        let results: Vec<Value> = hits
            .into_iter()
            .filter(|hit| min_score.is_none_or(|min| f64::from(hit.score) >= min))
            .map(|hit| {
                json!({
                    "id": hit.id,
                    "score": hit.score,
                    "text": hit.text,
                    "metadata": hit.metadata,
                })
            })
            .collect();

        Ok(ToolResult::json(json!({
            "query": query,
            "collection": collection,
            "count": results.len(),
            "results": results,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_llm::{Embedder, InMemoryVectorIndex, MockEmbedder};
    use std::sync::Arc;

    async fn seeded() -> VectorSearchTool {
        let embedder = Arc::new(MockEmbedder::new(16));
        let index = Arc::new(InMemoryVectorIndex::new());
        for (id, text) in [("a", "refund policy"), ("b", "shipping times"), ("c", "warranty")] {
            let vector = embedder.embed(text).await.unwrap();
            index.upsert("docs", id, text, vector, json!({}));
        }
        VectorSearchTool::new(embedder, index, "docs", 2)
    }

    #[tokio::test]
    async fn test_exact_text_ranks_first() {
        let value = seeded()
            .await
            .execute(json!({"query": "shipping times"}), &ToolContext::default())
            .await
            .unwrap()
            .to_value();
        assert_eq!(value["count"], 2);
        assert_eq!(value["results"][0]["id"], "b");
    }

    #[tokio::test]
    async fn test_min_score_filters() {
        let value = seeded()
            .await
            .execute(
                json!({"query": "warranty", "top_k": 3, "min_score": 0.999}),
                &ToolContext::default(),
            )
            .await
            .unwrap()
            .to_value();
        assert_eq!(value["count"], 1);
        assert_eq!(value["results"][0]["text"], "warranty");
    }

    #[tokio::test]
    async fn test_min_score_out_of_range_rejected() {
        let err = seeded()
            .await
            .validate(&json!({"query": "x", "min_score": 1.5}))
            .unwrap_err();
        assert!(matches!(err, ParameterValidationError::OutOfRange { .. }));
    }

    #[tokio::test]
    async fn test_unknown_collection_is_failure_result() {
        let result = seeded()
            .await
            .execute(
                json!({"query": "x", "collection": "nope"}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert!(result.error_message().unwrap().starts_with("Search failed"));
    }
}
