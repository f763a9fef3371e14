//! File-based knowledge store: JSON-lines records with embeddings.
//!
//! Each line is one chunk of an ingested document together with its
//! embedding vector. Records are loaded into memory on open; new records are
//! appended to the file as they are added.

use aicrew_core::error::RetrievalError;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// One stored chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub content: String,

    /// File the chunk came from
    pub source: String,

    /// Position of the chunk within its source
    pub chunk_index: usize,

    pub embedding: Vec<f32>,
}

/// A JSONL-backed collection of knowledge records.
pub struct KnowledgeStore {
    path: PathBuf,
    records: RwLock<Vec<KnowledgeRecord>>,
}

impl KnowledgeStore {
    /// Open the store at `path`.
    ///
    /// A missing file is an empty store (the file is created on first
    /// append). Corrupted lines are skipped with a warning.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = records.len(), "Knowledge store loaded");
        Self {
            path,
            records: RwLock::new(records),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Vec<KnowledgeRecord> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(), // File doesn't exist yet, start empty
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<KnowledgeRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted knowledge record");
                    None
                }
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// A copy of all records.
    pub async fn snapshot(&self) -> Vec<KnowledgeRecord> {
        self.records.read().await.clone()
    }

    /// Run `f` over the records without copying them.
    pub async fn with_records<T>(&self, f: impl FnOnce(&[KnowledgeRecord]) -> T) -> T {
        let records = self.records.read().await;
        f(&records)
    }

    /// Append records to memory and to the file.
    pub async fn append(&self, new_records: Vec<KnowledgeRecord>) -> Result<(), RetrievalError> {
        if new_records.is_empty() {
            return Ok(());
        }

        let mut content = String::new();
        for record in &new_records {
            let line = serde_json::to_string(record).map_err(|e| {
                RetrievalError::Storage(format!("Failed to serialize knowledge record: {e}"))
            })?;
            content.push_str(&line);
            content.push('\n');
        }

        let mut records = self.records.write().await;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                RetrievalError::Storage(format!("Failed to create knowledge directory: {e}"))
            })?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RetrievalError::Storage(format!("Failed to open knowledge file: {e}")))?;
        file.write_all(content.as_bytes())
            .map_err(|e| RetrievalError::Storage(format!("Failed to write knowledge file: {e}")))?;

        records.extend(new_records);
        Ok(())
    }
}
