pub mod avatars;
pub mod check;
pub mod daemon;
pub mod ingest;

use std::sync::Arc;
use std::time::Duration;

use aicrew_config::AppConfig;
use aicrew_config::profiles::{ProfileContext, load_profiles};
use aicrew_core::avatar::AvatarProfile;
use aicrew_core::retrieval::RetrievalClient;
use aicrew_core::tool::ToolRegistry;
use aicrew_providers::ModelGateway;
use aicrew_retrieval::{EmbeddingRetriever, KnowledgeStore, NoopRetriever};
use tracing::warn;

/// Model backends, tools, and the profiles that validate against them.
pub struct Assembly {
    pub models: Arc<ModelGateway>,
    pub tools: Arc<ToolRegistry>,
    pub profiles: Vec<AvatarProfile>,
}

pub fn assemble(config: &AppConfig) -> Result<Assembly, Box<dyn std::error::Error>> {
    let models = Arc::new(aicrew_providers::build_from_config(config));
    let tools = Arc::new(aicrew_tools::default_registry(Duration::from_secs(
        config.pipeline.tool_timeout_secs,
    )));

    let ctx = ProfileContext {
        known_tools: tools.names(),
        known_backends: models.backend_names(),
    };
    let profiles = load_profiles(config, &ctx)
        .map_err(|e| format!("Failed to load avatar profiles: {e}"))?;

    Ok(Assembly {
        models,
        tools,
        profiles,
    })
}

/// Embedding-backed retrieval over the configured knowledge store, or no
/// retrieval when the embedding backend is missing.
pub fn retrieval_client(config: &AppConfig, models: &ModelGateway) -> Arc<dyn RetrievalClient> {
    let backend = config.embedding_backend();
    match models.provider(backend) {
        Some(embedder) => {
            let store = Arc::new(KnowledgeStore::open(&config.rag.knowledge_path));
            Arc::new(
                EmbeddingRetriever::new(store, embedder, &config.rag.embedding_model)
                    .with_min_score(config.rag.min_score)
                    .with_timeout(Duration::from_secs(config.rag.timeout_secs)),
            )
        }
        None => {
            warn!(backend = %backend, "Embedding backend not configured, retrieval disabled");
            Arc::new(NoopRetriever)
        }
    }
}
