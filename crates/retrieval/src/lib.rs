//! Knowledge retrieval for aicrew.
//!
//! - [`store`]: JSONL knowledge store (chunks + embeddings)
//! - [`vector`]: cosine similarity ranking
//! - [`retriever`]: `RetrievalClient` implementations
//! - [`ingest`]: document chunking and ingestion

pub mod ingest;
pub mod retriever;
pub mod store;
pub mod vector;

pub use ingest::{IngestReport, Ingestor};
pub use retriever::{EmbeddingRetriever, NoopRetriever};
pub use store::{KnowledgeRecord, KnowledgeStore};
