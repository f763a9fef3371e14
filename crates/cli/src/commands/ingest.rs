//! `aicrew ingest`: add documents to the knowledge store.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aicrew_config::AppConfig;
use aicrew_retrieval::{Ingestor, KnowledgeStore};

pub async fn run(config: &AppConfig, dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let models = aicrew_providers::build_from_config(config);
    let backend = config.embedding_backend();
    let embedder = models
        .provider(backend)
        .ok_or_else(|| format!("Embedding backend '{backend}' is not configured"))?;

    let store = Arc::new(KnowledgeStore::open(&config.rag.knowledge_path));
    let before = store.len().await;

    let ingestor = Ingestor::new(store.clone(), embedder, &config.rag.embedding_model)
        .with_chunking(config.rag.chunk_size, config.rag.chunk_overlap)
        .with_extensions(config.rag.ingest_extensions.clone())
        .with_timeout(Duration::from_secs(config.rag.timeout_secs));
    let report = ingestor.ingest_dir(dir).await?;

    println!("Ingested {}", dir.display());
    println!("  Files:   {}", report.files);
    println!("  Chunks:  {}", report.chunks);
    println!("  Skipped: {}", report.skipped);
    println!("  Failed:  {}", report.failed);
    println!(
        "  Store:   {} ({} -> {} records)",
        store.path().display(),
        before,
        store.len().await
    );

    if report.files == 0 && report.failed > 0 {
        return Err("No documents could be ingested".into());
    }
    Ok(())
}
