//! The generation pipeline: one incoming item in, at most one reply out.
//!
//! ```text
//! START → FILTER? → RETRIEVE → GENERATE → { TOOL_ROUND → GENERATE }* → DONE | FAILED
//! ```
//!
//! FILTER runs only for channels listed in `filter_channels`. RETRIEVE is
//! skipped when the avatar has RAG off, and never fails the run. The tool
//! loop is bounded by `max_tool_rounds`; once the bound is hit, the next
//! GENERATE goes out without tools so the model has to answer in text. A
//! backend that cannot call tools never sees tool definitions at all. If
//! that forced answer comes back empty, [`EXHAUSTED_REPLY`] is sent instead.
//!
//! The pipeline never returns an error. A model gateway failure becomes
//! [`PipelineOutcome::Failed`] and the caller sends nothing.

use aicrew_core::avatar::AvatarProfile;
use aicrew_core::channel::{ChannelId, IncomingItem};
use aicrew_core::conversation::ConversationContext;
use aicrew_core::error::ProviderError;
use aicrew_core::message::Message;
use aicrew_core::provider::ModelOptions;
use aicrew_core::retrieval::{RetrievalClient, RetrievedSnippet};
use aicrew_core::tool::{ToolRegistry, ToolResult};
use aicrew_providers::{CompletionCall, ModelGateway, ModelReply};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::prompt;

/// Sent when the model runs out of tool rounds without producing text.
pub const EXHAUSTED_REPLY: &str = "I'm sorry, but I'm currently unable to process your request.";

/// States a run passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Start,
    Filter,
    Retrieve,
    Generate,
    /// 1-based round number
    ToolRound(usize),
    Done,
    Failed,
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// Send this text
    Replied(String),
    /// FILTER decided the item needs no reply
    Filtered,
    /// The model produced no text
    NoReply,
    /// The model gateway failed; nothing to send
    Failed(ProviderError),
}

/// Result of a single pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub outcome: PipelineOutcome,

    /// Every state visited, `Start` first
    pub trace: Vec<PipelineState>,

    /// Tool results fed back to the model, in execution order
    pub tool_results: Vec<ToolResult>,

    /// Snippets merged into the prompt
    pub snippets: Vec<RetrievedSnippet>,
}

impl PipelineRun {
    pub fn reply(&self) -> Option<&str> {
        match &self.outcome {
            PipelineOutcome::Replied(text) => Some(text),
            _ => None,
        }
    }

    pub fn tool_rounds(&self) -> usize {
        self.trace
            .iter()
            .filter(|s| matches!(s, PipelineState::ToolRound(_)))
            .count()
    }

    pub fn final_state(&self) -> PipelineState {
        self.trace.last().copied().unwrap_or(PipelineState::Start)
    }
}

/// Pipeline knobs, usually taken from `[pipeline]`, `[rag]` and `[llm]`.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_tool_rounds: usize,
    pub top_k: usize,
    pub filter_model: String,
    pub filter_channels: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: 3,
            top_k: 3,
            filter_model: "llama3:8b".into(),
            filter_channels: vec!["email".into()],
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &aicrew_config::AppConfig) -> Self {
        Self {
            max_tool_rounds: config.pipeline.max_tool_rounds,
            top_k: config.rag.top_k,
            filter_model: config.llm.filter_model.clone(),
            filter_channels: config.pipeline.filter_channels.clone(),
        }
    }
}

/// Turns incoming items into replies.
pub struct GenerationPipeline {
    gateway: Arc<ModelGateway>,
    tools: Arc<ToolRegistry>,
    retrieval: Arc<dyn RetrievalClient>,
    settings: PipelineSettings,
}

impl GenerationPipeline {
    pub fn new(
        gateway: Arc<ModelGateway>,
        tools: Arc<ToolRegistry>,
        retrieval: Arc<dyn RetrievalClient>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            gateway,
            tools,
            retrieval,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    fn filters(&self, channel: &ChannelId) -> bool {
        channel.as_str() != ChannelId::INTERNAL
            && self.settings.filter_channels.iter().any(|c| c == channel.as_str())
    }

    /// Run the full pipeline for one item.
    pub async fn run(
        &self,
        profile: &AvatarProfile,
        context: &ConversationContext,
        item: &IncomingItem,
    ) -> PipelineRun {
        let mut run = PipelineRun {
            outcome: PipelineOutcome::NoReply,
            trace: vec![PipelineState::Start],
            tool_results: Vec::new(),
            snippets: Vec::new(),
        };

        // ── FILTER ──
        if self.filters(&item.channel) {
            run.trace.push(PipelineState::Filter);
            match self.classify(profile, item).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(avatar = %profile.id, item = %item.id, "Filter decided no reply is needed");
                    run.trace.push(PipelineState::Done);
                    run.outcome = PipelineOutcome::Filtered;
                    return run;
                }
                Err(e) => {
                    warn!(avatar = %profile.id, item = %item.id, error = %e, "Filter call failed");
                    run.trace.push(PipelineState::Failed);
                    run.outcome = PipelineOutcome::Failed(e);
                    return run;
                }
            }
        }

        // ── RETRIEVE ──
        if profile.rag {
            run.trace.push(PipelineState::Retrieve);
            run.snippets = self.retrieve(profile, item).await;
        }

        // ── GENERATE / TOOL_ROUND ──
        let enabled: Vec<String> = profile
            .tools
            .iter()
            .filter(|t| self.tools.contains(t))
            .cloned()
            .collect();
        let offer_tools = !enabled.is_empty() && self.gateway.supports_tools(&profile.backend, &profile.model);
        let definitions = if offer_tools {
            self.tools.definitions_for(&enabled)
        } else {
            Vec::new()
        };

        let mut messages = prompt::build_messages(profile, context, &run.snippets, item);
        let mut round = 0usize;

        loop {
            run.trace.push(PipelineState::Generate);
            let tools = if round < self.settings.max_tool_rounds {
                definitions.clone()
            } else {
                Vec::new()
            };

            let reply = self
                .gateway
                .complete(CompletionCall {
                    backend: &profile.backend,
                    model: &profile.model,
                    messages: messages.clone(),
                    options: profile.options.clone(),
                    tools,
                })
                .await;

            match reply {
                Err(e) => {
                    warn!(avatar = %profile.id, item = %item.id, error = %e, "Generation failed");
                    run.trace.push(PipelineState::Failed);
                    run.outcome = PipelineOutcome::Failed(e);
                    return run;
                }
                Ok(ModelReply::Text(text)) => {
                    run.trace.push(PipelineState::Done);
                    run.outcome = if !text.trim().is_empty() {
                        PipelineOutcome::Replied(text)
                    } else if round > 0 && round >= self.settings.max_tool_rounds {
                        warn!(avatar = %profile.id, item = %item.id, round, "Empty reply after the last tool round");
                        PipelineOutcome::Replied(EXHAUSTED_REPLY.to_string())
                    } else {
                        warn!(avatar = %profile.id, item = %item.id, "Model returned an empty reply");
                        PipelineOutcome::NoReply
                    };
                    return run;
                }
                Ok(ModelReply::ToolCalls { message, invocations }) => {
                    round += 1;
                    run.trace.push(PipelineState::ToolRound(round));
                    debug!(
                        avatar = %profile.id,
                        round,
                        calls = invocations.len(),
                        "Executing tool round"
                    );
                    messages.push(message);
                    for invocation in &invocations {
                        let result = self.tools.invoke_enabled(invocation, &enabled).await;
                        messages.push(Message::tool_result(&result.call_id, &result.output));
                        run.tool_results.push(result);
                    }
                    if round >= self.settings.max_tool_rounds {
                        info!(avatar = %profile.id, round, "Tool round limit reached, forcing a text reply");
                    }
                }
            }
        }
    }

    /// FILTER: ask the filter model whether the item deserves a reply.
    async fn classify(&self, profile: &AvatarProfile, item: &IncomingItem) -> Result<bool, ProviderError> {
        let reply = self
            .gateway
            .complete(CompletionCall {
                backend: &profile.backend,
                model: &self.settings.filter_model,
                messages: vec![Message::user(prompt::filter_prompt(item))],
                options: ModelOptions::deterministic(),
                tools: Vec::new(),
            })
            .await?;
        let decision = match reply {
            ModelReply::Text(text) => text,
            ModelReply::ToolCalls { message, .. } => message.content,
        };
        debug!(avatar = %profile.id, item = %item.id, decision = %decision.trim(), "Filter decision");
        Ok(prompt::wants_reply(&decision))
    }

    /// RETRIEVE: failures and empty results both mean "no extra context".
    async fn retrieve(&self, profile: &AvatarProfile, item: &IncomingItem) -> Vec<RetrievedSnippet> {
        if item.body.trim().is_empty() {
            return Vec::new();
        }
        match self.retrieval.search(&item.body, self.settings.top_k).await {
            Ok(mut hits) => {
                hits.truncate(self.settings.top_k);
                debug!(avatar = %profile.id, hits = hits.len(), "Retrieved knowledge");
                hits
            }
            Err(e) => {
                warn!(avatar = %profile.id, error = %e, "Retrieval failed, continuing without context");
                Vec::new()
            }
        }
    }
}
