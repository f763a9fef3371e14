//! Shared test helpers: scripted model backends, recording connectors,
//! counting tools, and profile builders.

use aicrew_core::avatar::{AvatarProfile, ScheduleSpec};
use aicrew_core::channel::{Connector, IncomingItem};
use aicrew_core::error::{ChannelError, ProviderError, RetrievalError, ToolError};
use aicrew_core::message::{Message, MessageToolCall};
use aicrew_core::provider::{ModelOptions, Provider, ProviderRequest, ProviderResponse, Usage};
use aicrew_core::retrieval::{RetrievalClient, RetrievedSnippet};
use aicrew_core::tool::{ParamKind, ParamSpec, Tool, ToolRegistry, ToolSpec};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted backend answer.
#[derive(Clone)]
pub enum Step {
    Text(String),
    Calls(Vec<MessageToolCall>),
    Fail(ProviderError),
    /// Sleep this long, then answer with text
    Slow(Duration, String),
}

/// A mock backend that replays a script and records every request.
///
/// Once the script runs out it keeps answering "fallback reply".
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ProviderRequest>>,
    tools: bool,
}

impl ScriptedProvider {
    pub fn new(tools: bool, steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            tools,
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supports_tools(&self) -> bool {
        self.tools
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::Text("fallback reply".into()));

        let message = match step {
            Step::Text(text) => Message::assistant(text),
            Step::Calls(calls) => {
                let mut msg = Message::assistant("");
                msg.tool_calls = calls;
                msg
            }
            Step::Fail(e) => return Err(e),
            Step::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                Message::assistant(text)
            }
        };
        Ok(ProviderResponse {
            message,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: request.model,
        })
    }
}

pub fn text(t: &str) -> Step {
    Step::Text(t.into())
}

/// Helper to create a tool call.
pub fn call(id: &str, name: &str, args: Value) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: args.to_string(),
    }
}

/// A tool that counts executions and echoes its `input` argument.
pub struct CountingTool {
    pub name: &'static str,
    pub runs: Arc<AtomicUsize>,
}

impl CountingTool {
    pub fn new(name: &'static str) -> (Self, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (Self { name, runs: runs.clone() }, runs)
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.into(),
            description: format!("test tool {}", self.name),
            params: vec![ParamSpec::required("input", ParamKind::String, "anything")],
        }
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<String, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "{} saw {}",
            self.name,
            arguments.get("input").and_then(Value::as_str).unwrap_or("")
        ))
    }
}

/// A registry holding the given counting tools.
pub fn registry(tools: Vec<CountingTool>) -> ToolRegistry {
    let candidates = tools
        .into_iter()
        .map(|t| (t.name.to_string(), Box::new(t) as Box<dyn Tool>))
        .collect();
    ToolRegistry::discover(candidates, Duration::from_secs(5))
}

/// A retrieval client with a fixed answer.
pub enum StaticRetriever {
    Hits(Vec<RetrievedSnippet>),
    Fails,
}

#[async_trait]
impl RetrievalClient for StaticRetriever {
    async fn search(&self, _query: &str, top_k: usize) -> Result<Vec<RetrievedSnippet>, RetrievalError> {
        match self {
            StaticRetriever::Hits(hits) => Ok(hits.iter().take(top_k).cloned().collect()),
            StaticRetriever::Fails => Err(RetrievalError::QueryFailed("index offline".into())),
        }
    }
}

/// A connector serving a fixed batch of items once and recording sends.
pub struct RecordingConnector {
    pub channel: &'static str,
    pending: Mutex<Vec<IncomingItem>>,
    pub sent: Mutex<Vec<(String, String)>>,
    fail_sends: bool,
}

impl RecordingConnector {
    pub fn new(channel: &'static str, items: Vec<IncomingItem>) -> Self {
        Self {
            channel,
            pending: Mutex::new(items),
            sent: Mutex::new(Vec::new()),
            fail_sends: false,
        }
    }

    pub fn failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub fn push(&self, item: IncomingItem) {
        self.pending.lock().unwrap().push(item);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    fn name(&self) -> &str {
        self.channel
    }

    async fn fetch_new(&self) -> Result<Vec<IncomingItem>, ChannelError> {
        Ok(std::mem::take(&mut *self.pending.lock().unwrap()))
    }

    async fn send(&self, recipient: &str, text: &str, _thread: Option<&str>) -> Result<(), ChannelError> {
        if self.fail_sends {
            return Err(ChannelError::DeliveryFailed {
                channel: self.channel.into(),
                reason: "mailbox full".into(),
            });
        }
        self.sent.lock().unwrap().push((recipient.into(), text.into()));
        Ok(())
    }
}

/// A minimal profile on the "mock" backend.
pub fn profile(id: &str, tools: &[&str]) -> AvatarProfile {
    let mut name = id.to_string();
    if let Some(first) = name.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    AvatarProfile {
        id: id.into(),
        name,
        personality: "Helpful and brief.".into(),
        skills: vec!["answering questions".into()],
        tools: tools.iter().map(|t| t.to_string()).collect(),
        backend: "mock".into(),
        model: "mock-model".into(),
        options: ModelOptions::default(),
        history_limit: 10,
        rag: true,
        schedule: ScheduleSpec::Interval {
            every_secs: 240,
            jitter_secs: 0,
        },
        active_windows: Vec::new(),
        connectors: Vec::new(),
        topics: Vec::new(),
        escalate_to: None,
    }
}
