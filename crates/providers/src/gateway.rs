//! Model gateway: uniform access to every configured backend.
//!
//! The gateway owns the backends by name, applies a per-call timeout, and
//! normalizes a response into either a final text reply or a list of
//! proposed tool invocations. It also tracks tool-calling capability: a
//! backend configured without tools never sees tool definitions, and a
//! model that rejects them at runtime is remembered as tool-less. Other
//! models on the same backend keep their tools.

use aicrew_core::error::ProviderError;
use aicrew_core::message::Message;
use aicrew_core::provider::{
    EmbeddingRequest, ModelOptions, Provider, ProviderRequest, ToolDefinition,
};
use aicrew_core::tool::ToolInvocation;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A normalized model response.
#[derive(Debug, Clone)]
pub enum ModelReply {
    /// Final text
    Text(String),

    /// The model wants tools run. `message` is the assistant turn that
    /// carried the calls; it must precede the tool results in the exchange.
    ToolCalls {
        message: Message,
        invocations: Vec<ToolInvocation>,
    },
}

/// One completion call as the pipeline sees it.
#[derive(Debug, Clone)]
pub struct CompletionCall<'a> {
    pub backend: &'a str,
    pub model: &'a str,
    pub messages: Vec<Message>,
    pub options: ModelOptions,

    /// Offered tools; ignored when the backend cannot call tools
    pub tools: Vec<ToolDefinition>,
}

struct Backend {
    provider: Arc<dyn Provider>,
    tools_ok: bool,
    /// Models that rejected tool definitions
    tool_less: Mutex<HashSet<String>>,
}

impl Backend {
    fn tools_ok(&self, model: &str) -> bool {
        self.tools_ok && !self.tool_less.lock().unwrap_or_else(|e| e.into_inner()).contains(model)
    }

    fn mark_tool_less(&self, model: &str) {
        self.tool_less
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(model.to_string());
    }
}

/// Routes calls to named backends.
pub struct ModelGateway {
    backends: HashMap<String, Backend>,
    default_backend: String,
    timeout: Duration,
}

impl ModelGateway {
    pub fn new(default_backend: impl Into<String>, timeout: Duration) -> Self {
        Self {
            backends: HashMap::new(),
            default_backend: default_backend.into(),
            timeout,
        }
    }

    /// Register a backend. Replaces any existing backend with the same name.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        let backend = Backend {
            tools_ok: provider.supports_tools(),
            provider,
            tool_less: Mutex::new(HashSet::new()),
        };
        self.backends.insert(name.into(), backend);
    }

    pub fn default_backend(&self) -> &str {
        &self.default_backend
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get a backend's provider by name.
    pub fn provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.backends.get(name).map(|b| b.provider.clone())
    }

    /// List all registered backend names, sorted.
    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether tool definitions would be sent to `model` on this backend.
    pub fn supports_tools(&self, backend: &str, model: &str) -> bool {
        self.backends.get(backend).is_some_and(|b| b.tools_ok(model))
    }

    /// Run one completion.
    ///
    /// Tools are dropped for backends that cannot call them. If a backend
    /// rejects tools at runtime the call is repeated without them and that
    /// model is marked tool-less. Tool calls returned when none were
    /// offered are ignored. Errors are network, API, or timeout failures.
    pub async fn complete(&self, call: CompletionCall<'_>) -> Result<ModelReply, ProviderError> {
        let backend = self
            .backends
            .get(call.backend)
            .ok_or_else(|| ProviderError::NotConfigured(format!("unknown backend '{}'", call.backend)))?;

        let offer_tools = !call.tools.is_empty() && backend.tools_ok(call.model);
        let mut request = ProviderRequest {
            model: call.model.to_string(),
            messages: call.messages,
            options: call.options,
            tools: if offer_tools { call.tools } else { Vec::new() },
        };

        let response = match self.send(call.backend, backend, request.clone()).await {
            Err(ProviderError::ToolsUnsupported(reason)) if offer_tools => {
                warn!(backend = %call.backend, model = %call.model, %reason, "Model rejected tools, retrying without");
                backend.mark_tool_less(call.model);
                request.tools.clear();
                self.send(call.backend, backend, request).await?
            }
            other => other?,
        };

        if offer_tools && !response.tool_calls().is_empty() {
            let invocations = response
                .tool_calls()
                .iter()
                .map(|tc| ToolInvocation::from_raw(tc.id.clone(), tc.name.clone(), &tc.arguments))
                .collect();
            return Ok(ModelReply::ToolCalls {
                message: response.message,
                invocations,
            });
        }

        if !offer_tools && !response.tool_calls().is_empty() {
            debug!(backend = %call.backend, "Ignoring tool calls on a tool-less request");
        }
        Ok(ModelReply::Text(response.message.content))
    }

    async fn send(
        &self,
        name: &str,
        backend: &Backend,
        request: ProviderRequest,
    ) -> Result<aicrew_core::ProviderResponse, ProviderError> {
        match tokio::time::timeout(self.timeout, backend.provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "backend '{name}' did not answer within {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    /// Embed `inputs` with the named backend, under the gateway timeout.
    pub async fn embed(&self, backend: &str, model: &str, inputs: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
        let provider = self
            .provider(backend)
            .ok_or_else(|| ProviderError::NotConfigured(format!("unknown backend '{backend}'")))?;
        let request = EmbeddingRequest {
            model: model.to_string(),
            inputs,
        };
        match tokio::time::timeout(self.timeout, provider.embed(request)).await {
            Ok(result) => Ok(result?.embeddings),
            Err(_) => Err(ProviderError::Timeout(format!("embedding via '{backend}' timed out"))),
        }
    }

    /// Check every backend and log the result.
    pub async fn health_report(&self) -> Vec<(String, bool)> {
        let mut report = Vec::new();
        for name in self.backend_names() {
            let Some(backend) = self.backends.get(&name) else { continue };
            let ok = matches!(
                tokio::time::timeout(self.timeout, backend.provider.health_check()).await,
                Ok(Ok(true))
            );
            info!(backend = %name, healthy = ok, "Backend health");
            report.push((name, ok));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aicrew_core::message::MessageToolCall;
    use aicrew_core::provider::ProviderResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays scripted results and records whether tools were offered.
    struct ScriptedBackend {
        tools: bool,
        script: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
        offered: Mutex<Vec<usize>>,
        delay: Duration,
    }

    impl ScriptedBackend {
        fn new(tools: bool, script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
            Self {
                tools,
                script: Mutex::new(script),
                offered: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn supports_tools(&self) -> bool {
            self.tools
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.offered.lock().unwrap().push(request.tools.len());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Ok(text("fallback"));
            }
            script.remove(0)
        }
    }

    fn text(s: &str) -> ProviderResponse {
        ProviderResponse { message: Message::assistant(s), usage: None, model: "m".into() }
    }

    fn tool_call(name: &str) -> ProviderResponse {
        let mut message = Message::assistant("");
        message.tool_calls.push(MessageToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: r#"{"expression":"1+1"}"#.into(),
        });
        ProviderResponse { message, usage: None, model: "m".into() }
    }

    fn tool_defs() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "calculator".into(),
            description: "math".into(),
            parameters: serde_json::json!({"type": "object"}),
        }]
    }

    fn call(tools: Vec<ToolDefinition>) -> CompletionCall<'static> {
        CompletionCall {
            backend: "b",
            model: "m",
            messages: vec![Message::user("hi")],
            options: ModelOptions::default(),
            tools,
        }
    }

    fn gateway_with(backend: Arc<ScriptedBackend>) -> ModelGateway {
        let mut gw = ModelGateway::new("b", Duration::from_secs(5));
        gw.register("b", backend);
        gw
    }

    #[tokio::test]
    async fn text_reply_is_normalized() {
        let backend = Arc::new(ScriptedBackend::new(true, vec![Ok(text("hello"))]));
        let gw = gateway_with(backend);
        match gw.complete(call(vec![])).await.unwrap() {
            ModelReply::Text(t) => assert_eq!(t, "hello"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_calls_are_normalized() {
        let backend = Arc::new(ScriptedBackend::new(true, vec![Ok(tool_call("calculator"))]));
        let gw = gateway_with(backend);
        match gw.complete(call(tool_defs())).await.unwrap() {
            ModelReply::ToolCalls { invocations, message } => {
                assert_eq!(invocations[0].name, "calculator");
                assert_eq!(invocations[0].arguments["expression"], "1+1");
                assert_eq!(message.tool_calls.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_less_backend_never_sees_or_returns_tools() {
        let backend = Arc::new(ScriptedBackend::new(false, vec![Ok(tool_call("calculator"))]));
        let gw = gateway_with(backend.clone());
        assert!(!gw.supports_tools("b", "m"));
        let reply = gw.complete(call(tool_defs())).await.unwrap();
        assert!(matches!(reply, ModelReply::Text(_)));
        assert_eq!(*backend.offered.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn runtime_rejection_retries_without_tools() {
        let backend = Arc::new(ScriptedBackend::new(
            true,
            vec![Err(ProviderError::ToolsUnsupported("no tools".into())), Ok(text("plain"))],
        ));
        let gw = gateway_with(backend.clone());
        match gw.complete(call(tool_defs())).await.unwrap() {
            ModelReply::Text(t) => assert_eq!(t, "plain"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(*backend.offered.lock().unwrap(), vec![1, 0]);
        assert!(!gw.supports_tools("b", "m"));
    }

    #[tokio::test]
    async fn tool_rejection_is_remembered_per_model() {
        let backend = Arc::new(ScriptedBackend::new(
            true,
            vec![
                Ok(tool_call("calculator")),
                Err(ProviderError::ToolsUnsupported("llama3 does not support tools".into())),
                Ok(text("plain")),
                Ok(tool_call("calculator")),
                Ok(text("still plain")),
            ],
        ));
        let gw = gateway_with(backend.clone());
        let on = |model: &'static str| CompletionCall { model, ..call(tool_defs()) };

        assert!(matches!(gw.complete(on("qwen")).await.unwrap(), ModelReply::ToolCalls { .. }));
        assert!(matches!(gw.complete(on("llama3")).await.unwrap(), ModelReply::Text(_)));

        assert!(gw.supports_tools("b", "qwen"));
        assert!(!gw.supports_tools("b", "llama3"));
        assert!(matches!(gw.complete(on("qwen")).await.unwrap(), ModelReply::ToolCalls { .. }));
        assert!(matches!(gw.complete(on("llama3")).await.unwrap(), ModelReply::Text(_)));
        assert_eq!(*backend.offered.lock().unwrap(), vec![1, 1, 0, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let mut slow = ScriptedBackend::new(true, vec![Ok(text("late"))]);
        slow.delay = Duration::from_secs(30);
        let gw = gateway_with(Arc::new(slow));
        let err = gw.complete(call(vec![])).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn unknown_backend_is_not_configured() {
        let gw = ModelGateway::new("b", Duration::from_secs(1));
        let err = gw.complete(call(vec![])).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
