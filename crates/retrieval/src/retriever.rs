//! Retrieval clients.

use aicrew_core::error::RetrievalError;
use aicrew_core::provider::{EmbeddingRequest, Provider};
use aicrew_core::retrieval::{RetrievalClient, RetrievedSnippet};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::store::KnowledgeStore;
use crate::vector;

/// Embeds the query with a model backend and ranks stored chunks by cosine
/// similarity.
pub struct EmbeddingRetriever {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn Provider>,
    model: String,
    min_score: Option<f32>,
    timeout: Duration,
}

impl EmbeddingRetriever {
    pub fn new(store: Arc<KnowledgeStore>, embedder: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            store,
            embedder,
            model: model.into(),
            min_score: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RetrievalError> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            inputs: vec![query.to_string()],
        };
        let response = tokio::time::timeout(self.timeout, self.embedder.embed(request))
            .await
            .map_err(|_| RetrievalError::EmbeddingFailed(format!("timed out after {}s", self.timeout.as_secs())))?
            .map_err(|e| RetrievalError::EmbeddingFailed(e.to_string()))?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::EmbeddingFailed("backend returned no embedding".into()))
    }
}

#[async_trait]
impl RetrievalClient for EmbeddingRetriever {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedSnippet>, RetrievalError> {
        if top_k == 0 || self.store.is_empty().await {
            return Ok(Vec::new());
        }

        let query_embedding = self.embed_query(query).await?;
        let hits = self
            .store
            .with_records(|records| vector::rank(records, &query_embedding, top_k, self.min_score))
            .await;
        debug!(hits = hits.len(), top_k, "Knowledge search complete");
        Ok(hits)
    }
}

/// A retrieval client that never finds anything.
pub struct NoopRetriever;

#[async_trait]
impl RetrievalClient for NoopRetriever {
    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<RetrievedSnippet>, RetrievalError> {
        Ok(Vec::new())
    }
}
