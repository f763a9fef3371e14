//! Knowledge ingestion: read documents, chunk, embed, append to the store.

use aicrew_core::error::RetrievalError;
use aicrew_core::provider::{EmbeddingRequest, Provider};
use scraper::Html;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::store::{KnowledgeRecord, KnowledgeStore};

/// Split text into chunks of `size` words, consecutive chunks sharing
/// `overlap` words. Requires `overlap < size`.
pub fn chunk_words(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || size == 0 {
        return Vec::new();
    }
    let step = size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Visible text of an HTML document, without script and style content.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else { continue };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript" | "head"))
        });
        let text = text.trim();
        if !hidden && !text.is_empty() {
            parts.push(text.to_string());
        }
    }
    parts.join(" ")
}

/// Totals for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub files: usize,
    pub chunks: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Walks a directory and feeds matching documents into a knowledge store.
pub struct Ingestor {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn Provider>,
    model: String,
    chunk_size: usize,
    chunk_overlap: usize,
    extensions: Vec<String>,
    timeout: Duration,
}

impl Ingestor {
    pub fn new(store: Arc<KnowledgeStore>, embedder: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            store,
            embedder,
            model: model.into(),
            chunk_size: 500,
            chunk_overlap: 50,
            extensions: vec!["txt".into(), "md".into(), "html".into(), "htm".into()],
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_chunking(mut self, size: usize, overlap: usize) -> Self {
        self.chunk_size = size;
        self.chunk_overlap = overlap;
        self
    }

    /// Extensions to accept, without the leading dot, case-insensitive.
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(&e.to_lowercase()))
    }

    /// Ingest every accepted file under `dir`. Per-file failures are logged
    /// and counted; only an unreadable root directory is an error.
    pub async fn ingest_dir(&self, dir: &Path) -> Result<IngestReport, RetrievalError> {
        if !dir.is_dir() {
            return Err(RetrievalError::Storage(format!(
                "knowledge directory not found: {}",
                dir.display()
            )));
        }

        let mut report = IngestReport::default();
        let mut paths: Vec<_> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        for path in paths {
            if !self.accepts(&path) {
                debug!(path = %path.display(), "Skipping file with unlisted extension");
                report.skipped += 1;
                continue;
            }
            match self.ingest_file(dir, &path).await {
                Ok(0) => {
                    warn!(path = %path.display(), "Skipping empty document");
                    report.skipped += 1;
                }
                Ok(n) => {
                    info!(path = %path.display(), chunks = n, "Ingested document");
                    report.files += 1;
                    report.chunks += n;
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to ingest document");
                    report.failed += 1;
                }
            }
        }

        info!(?report, "Knowledge ingestion complete");
        Ok(report)
    }

    /// Returns the number of chunks stored.
    async fn ingest_file(&self, root: &Path, path: &Path) -> Result<usize, RetrievalError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RetrievalError::Storage(format!("read failed: {e}")))?;

        let is_html = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e.to_lowercase().as_str(), "html" | "htm"));
        let text = if is_html { html_to_text(&raw) } else { raw };

        let chunks = chunk_words(&text, self.chunk_size, self.chunk_overlap);
        if chunks.is_empty() {
            return Ok(0);
        }

        let request = EmbeddingRequest {
            model: self.model.clone(),
            inputs: chunks.clone(),
        };
        let response = tokio::time::timeout(self.timeout, self.embedder.embed(request))
            .await
            .map_err(|_| RetrievalError::EmbeddingFailed("embedding timed out".into()))?
            .map_err(|e| RetrievalError::EmbeddingFailed(e.to_string()))?;

        if response.embeddings.len() != chunks.len() {
            return Err(RetrievalError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                response.embeddings.len()
            )));
        }

        let source = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        let records: Vec<KnowledgeRecord> = chunks
            .into_iter()
            .zip(response.embeddings)
            .enumerate()
            .map(|(chunk_index, (content, embedding))| KnowledgeRecord {
                content,
                source: source.clone(),
                chunk_index,
                embedding,
            })
            .collect();

        let n = records.len();
        self.store.append(records).await?;
        Ok(n)
    }
}
