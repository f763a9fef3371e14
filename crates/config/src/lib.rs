//! Configuration loading and validation for aicrew.
//!
//! The application config lives in `aicrew.toml` (every section optional,
//! missing file = defaults) with environment overrides for the backend
//! selection and API key. Avatar profiles are separate TOML files, one per
//! avatar, loaded by [`profiles`].

pub mod profiles;

pub use profiles::{load_profiles, ProfileContext};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `aicrew.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,

    #[serde(default)]
    pub llm: LlmConfig,

    /// Backend-specific configurations, keyed by backend name
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub avatar: AvatarDefaults,

    #[serde(default)]
    pub rag: RagConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Model backend defaults.
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_backend")]
    pub default_backend: String,

    #[serde(default = "default_model")]
    pub default_model: String,

    /// Model used for the reply/ignore classification call
    #[serde(default = "default_model")]
    pub filter_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Fallback key for backends without their own `api_key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_backend() -> String {
    "ollama".into()
}
fn default_model() -> String {
    "llama3:8b".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_backend: default_backend(),
            default_model: default_model(),
            filter_model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("default_backend", &self.default_backend)
            .field("default_model", &self.default_model)
            .field("filter_model", &self.filter_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_key", &redact(&self.api_key))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// One model backend.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default = "default_true")]
    pub supports_tools: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            supports_tools: true,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("supports_tools", &self.supports_tools)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarDefaults {
    #[serde(default = "default_profiles_dir")]
    pub profiles_dir: PathBuf,

    #[serde(default = "default_history_limit")]
    pub default_history_limit: usize,
}

fn default_profiles_dir() -> PathBuf {
    PathBuf::from("profiles")
}
fn default_history_limit() -> usize {
    10
}

impl Default for AvatarDefaults {
    fn default() -> Self {
        Self {
            profiles_dir: default_profiles_dir(),
            default_history_limit: default_history_limit(),
        }
    }
}

/// Retrieval and ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_knowledge_path")]
    pub knowledge_path: PathBuf,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Backend used for embeddings; defaults to `llm.default_backend`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_backend: Option<String>,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Snippets scoring below this cosine similarity are discarded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,

    /// Chunk length in words
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_ingest_extensions")]
    pub ingest_extensions: Vec<String>,

    #[serde(default = "default_rag_timeout")]
    pub timeout_secs: u64,
}

fn default_knowledge_path() -> PathBuf {
    PathBuf::from("knowledge/knowledge.jsonl")
}
fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}
fn default_top_k() -> usize {
    3
}
fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_ingest_extensions() -> Vec<String> {
    ["txt", "md", "html", "htm"].iter().map(|s| s.to_string()).collect()
}
fn default_rag_timeout() -> u64 {
    30
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            knowledge_path: default_knowledge_path(),
            embedding_model: default_embedding_model(),
            embedding_backend: None,
            top_k: default_top_k(),
            min_score: None,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            ingest_extensions: default_ingest_extensions(),
            timeout_secs: default_rag_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Channels whose items go through the reply/ignore classification
    #[serde(default = "default_filter_channels")]
    pub filter_channels: Vec<String>,
}

fn default_max_tool_rounds() -> usize {
    3
}
fn default_tool_timeout() -> u64 {
    30
}
fn default_filter_channels() -> Vec<String> {
    vec!["email".into()]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            tool_timeout_secs: default_tool_timeout(),
            filter_channels: default_filter_channels(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,

    /// Maximum avatar runs executing at once
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_interval_minutes")]
    pub default_interval_minutes: u64,

    #[serde(default = "default_jitter_seconds")]
    pub default_jitter_seconds: u64,
}

fn default_tick_millis() -> u64 {
    1000
}
fn default_workers() -> usize {
    4
}
fn default_interval_minutes() -> u64 {
    4
}
fn default_jitter_seconds() -> u64 {
    120
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_millis: default_tick_millis(),
            workers: default_workers(),
            default_interval_minutes: default_interval_minutes(),
            default_jitter_seconds: default_jitter_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-subscriber queue length before the oldest message is dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, then apply environment overrides:
    /// - `AICREW_API_KEY` (then `OPENAI_API_KEY`, `OPENROUTER_API_KEY`)
    /// - `AICREW_BACKEND`
    /// - `AICREW_MODEL`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.llm.api_key.is_none() {
            self.llm.api_key = lookup("AICREW_API_KEY")
                .or_else(|| lookup("OPENAI_API_KEY"))
                .or_else(|| lookup("OPENROUTER_API_KEY"));
        }

        if let Some(backend) = lookup("AICREW_BACKEND") {
            self.llm.default_backend = backend;
        }

        if let Some(model) = lookup("AICREW_MODEL") {
            self.llm.default_model = model;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.pipeline.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.max_tool_rounds must be at least 1".into(),
            ));
        }
        if self.scheduler.workers == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.workers must be at least 1".into(),
            ));
        }
        if self.bus.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "bus.queue_capacity must be at least 1".into(),
            ));
        }
        if self.rag.top_k == 0 {
            return Err(ConfigError::ValidationError("rag.top_k must be at least 1".into()));
        }
        if self.rag.chunk_overlap >= self.rag.chunk_size {
            return Err(ConfigError::ValidationError(
                "rag.chunk_overlap must be smaller than rag.chunk_size".into(),
            ));
        }
        Ok(())
    }

    /// Backend used for embeddings.
    pub fn embedding_backend(&self) -> &str {
        self.rag
            .embedding_backend
            .as_deref()
            .unwrap_or(&self.llm.default_backend)
    }

    /// Generate a default config TOML string (for `aicrew check --print-default`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
