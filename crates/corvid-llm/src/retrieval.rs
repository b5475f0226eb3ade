//! Vector search capability.
//!
//! The engine consumes search as an opaque capability:
//! `search(collection, vector, top_k) -> [{id, score, text, metadata}]`.
//! [`HttpVectorIndex`] talks to a remote search service and
//! [`InMemoryVectorIndex`] keeps documents in process.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::embeddings::cosine_similarity;
use crate::error::{LlmError, Result};
use crate::openai::build_http_client;

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Trait for vector search backends.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `top_k` hits ordered by descending score.
    async fn search(&self, collection: &str, vector: &[f32], top_k: usize)
    -> Result<Vec<SearchHit>>;

    /// Get the name of this index.
    fn name(&self) -> &str;
}

/// A vector index shared across runs.
pub type SharedVectorIndex = Arc<dyn VectorIndex>;

// ─────────────────────────────────────────────────────────────────────────────
// In-memory index
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    text: String,
    vector: Vec<f32>,
    metadata: serde_json::Value,
}

/// Cosine-similarity index held in memory, keyed by collection.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<String, Vec<StoredDocument>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document in a collection.
    pub fn upsert(
        &self,
        collection: &str,
        id: impl Into<String>,
        text: impl Into<String>,
        vector: Vec<f32>,
        metadata: serde_json::Value,
    ) {
        let doc = StoredDocument {
            id: id.into(),
            text: text.into(),
            vector,
            metadata,
        };
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        let docs = collections.entry(collection.to_string()).or_default();
        docs.retain(|d| d.id != doc.id);
        docs.push(doc);
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        let docs = collections
            .get(collection)
            .ok_or_else(|| LlmError::InvalidRequest(format!("Unknown collection: {collection}")))?;

        let mut hits: Vec<SearchHit> = docs
            .iter()
            .map(|d| SearchHit {
                id: d.id.clone(),
                score: cosine_similarity(vector, &d.vector),
                text: d.text.clone(),
                metadata: d.metadata.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP index
// ─────────────────────────────────────────────────────────────────────────────

/// Client for a remote search service exposing
/// `POST {base}/collections/{collection}/search`.
pub struct HttpVectorIndex {
    client: Client,
    base_url: String,
}

impl HttpVectorIndex {
    pub fn new(base_url: impl Into<String>, timeout: Duration, verify_tls: bool) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout, verify_tls, "vector-search")?,
            base_url: base_url.into(),
        })
    }

    fn search_url(&self, collection: &str) -> String {
        format!(
            "{}/collections/{}/search",
            self.base_url.trim_end_matches('/'),
            collection
        )
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .post(self.search_url(collection))
            .json(&SearchRequest { vector, top_k })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), body));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Serialization(format!("Failed to parse response: {}", e)))?;
        Ok(parsed.results)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_orders_by_score() {
        let index = InMemoryVectorIndex::new();
        index.upsert("docs", "a", "alpha", vec![1.0, 0.0], serde_json::json!({}));
        index.upsert("docs", "b", "beta", vec![0.7, 0.7], serde_json::json!({}));
        index.upsert("docs", "c", "gamma", vec![0.0, 1.0], serde_json::json!({}));

        let hits = index.search("docs", &[1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "b");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_in_memory_upsert_replaces() {
        let index = InMemoryVectorIndex::new();
        index.upsert("docs", "a", "old", vec![1.0], serde_json::json!({}));
        index.upsert("docs", "a", "new", vec![1.0], serde_json::json!({}));
        assert_eq!(index.len("docs"), 1);
        let hits = index.search("docs", &[1.0], 5).await.unwrap();
        assert_eq!(hits[0].text, "new");
    }

    #[tokio::test]
    async fn test_in_memory_unknown_collection() {
        let index = InMemoryVectorIndex::new();
        assert!(index.search("nope", &[1.0], 3).await.is_err());
        assert!(index.is_empty("nope"));
    }

    #[test]
    fn test_http_search_url() {
        let index =
            HttpVectorIndex::new("http://vectors:6333/", Duration::from_secs(1), true).unwrap();
        assert_eq!(
            index.search_url("kb"),
            "http://vectors:6333/collections/kb/search"
        );
    }
}
