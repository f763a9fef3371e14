//! Error types for the aicrew domain.
//!
//! Each collaborator boundary (model backends, connectors, retrieval, tools)
//! has its own enum; [`Error`] wraps them all.

use thiserror::Error;

/// Any failure crossing a collaborator boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Model backend error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Connector error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures talking to a model backend. `ToolsUnsupported` is a capability
/// mismatch, not an outage.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Backend does not support tool calling: {0}")]
    ToolsUnsupported(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("Connector not configured: {0}")]
    NotConfigured(String),

    #[error("Delivery through {channel} failed: {reason}")]
    DeliveryFailed { channel: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not registered: {0}")]
    NotFound(String),

    #[error("Tool not enabled for this avatar: {0}")]
    NotEnabled(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool registration rejected: {0}")]
    Registration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::NotEnabled("web_search".into()));
        assert!(err.to_string().contains("web_search"));
        assert!(err.to_string().contains("not enabled"));
    }

    #[test]
    fn channel_error_converts_into_top_level() {
        let err: Error = ChannelError::DeliveryFailed {
            channel: "email".into(),
            reason: "smtp down".into(),
        }
        .into();
        assert!(matches!(err, Error::Channel(_)));
        assert!(err.to_string().contains("smtp down"));
    }
}
