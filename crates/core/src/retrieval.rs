//! Retrieval client trait: similarity search over a knowledge store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::RetrievalError;

/// A knowledge fragment returned by a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedSnippet {
    pub content: String,

    /// Relevance in [-1, 1]; higher is better
    pub score: f32,

    /// Where the fragment came from (file path, URL)
    pub source: String,
}

/// Stateless query interface. Results are ordered by descending score and
/// hold at most `top_k` entries.
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> std::result::Result<Vec<RetrievedSnippet>, RetrievalError>;
}
