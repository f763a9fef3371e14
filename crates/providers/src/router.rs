//! Backend construction from configuration.

use std::sync::Arc;
use std::time::Duration;
use aicrew_config::AppConfig;
use crate::gateway::ModelGateway;
use crate::openai_compat::OpenAiCompatProvider;

/// Build the model gateway from configuration.
///
/// Every `[providers.<name>]` entry becomes an OpenAI-compatible backend.
/// The default backend is added even when it has no section.
pub fn build_from_config(config: &AppConfig) -> ModelGateway {
    let timeout = Duration::from_secs(config.llm.request_timeout_secs);
    let mut gateway = ModelGateway::new(&config.llm.default_backend, timeout);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.llm.api_key.clone())
            .unwrap_or_default();

        let base_url = provider_config
            .api_url
            .clone()
            .unwrap_or_else(|| default_base_url(name));

        let provider = OpenAiCompatProvider::new(name, &base_url, &api_key)
            .with_tool_support(provider_config.supports_tools)
            .with_timeout(timeout);
        gateway.register(name.clone(), Arc::new(provider));
    }

    // Ensure the default backend exists (even if not explicitly configured)
    if gateway.provider(&config.llm.default_backend).is_none() {
        let name = &config.llm.default_backend;
        let api_key = config.llm.api_key.clone().unwrap_or_default();
        let provider = OpenAiCompatProvider::new(name, default_base_url(name), api_key)
            .with_timeout(timeout);
        gateway.register(name.clone(), Arc::new(provider));
    }

    gateway
}

/// Get the default base URL for well-known backends.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "ollama" => "http://localhost:11434/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => "http://localhost:11434/v1".into(),
    }
}
