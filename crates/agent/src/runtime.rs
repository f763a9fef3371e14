//! Avatar runtime: one avatar's profile, connectors and conversation state.
//!
//! A scheduled cycle pulls new items from every connector, runs the
//! generation pipeline for each, sends replies back through the originating
//! connector, and only then records the exchange in the conversation
//! history. Inbound bus events are handled on the avatar's own task.
//!
//! Conversation state is behind a plain mutex that is never held across an
//! await: a run works on a snapshot and writes back after a successful send.

use aicrew_core::avatar::{AvatarId, AvatarProfile, AvatarRunner, CycleReport};
use aicrew_core::channel::{ChannelId, Connector, IncomingItem};
use aicrew_core::conversation::{ConversationContext, TurnRole};
use aicrew_core::event::{EventBus, EventMessage, Interest, Subscription};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pipeline::{GenerationPipeline, PipelineOutcome};

/// Topic that receives items an avatar decided not to answer.
pub const ITEM_IGNORED_TOPIC: &str = "item_ignored";

const PREVIEW_CHARS: usize = 200;

/// What happened to one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Replied,
    Ignored,
    /// The model answered with blank text; nothing is sent or handed off
    Empty,
    Failed,
    SendFailed,
}

pub struct AvatarRuntime {
    profile: Arc<AvatarProfile>,
    connectors: Vec<Arc<dyn Connector>>,
    pipeline: Arc<GenerationPipeline>,
    bus: EventBus,
    contexts: Mutex<HashMap<String, ConversationContext>>,
    connector_timeout: Duration,
}

impl AvatarRuntime {
    pub fn new(
        profile: AvatarProfile,
        connectors: Vec<Arc<dyn Connector>>,
        pipeline: Arc<GenerationPipeline>,
        bus: EventBus,
    ) -> Self {
        Self {
            profile: Arc::new(profile),
            connectors,
            pipeline,
            bus,
            contexts: Mutex::new(HashMap::new()),
            connector_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_connector_timeout(mut self, timeout: Duration) -> Self {
        self.connector_timeout = timeout;
        self
    }

    pub fn id(&self) -> &str {
        &self.profile.id
    }

    pub fn profile(&self) -> &AvatarProfile {
        &self.profile
    }

    pub fn connectors(&self) -> &[Arc<dyn Connector>] {
        &self.connectors
    }

    fn context_key(channel: &ChannelId, counterpart: &str) -> String {
        format!("{channel}:{counterpart}")
    }

    /// A copy of the history with one counterpart.
    pub fn context_snapshot(&self, channel: &ChannelId, counterpart: &str) -> ConversationContext {
        let key = Self::context_key(channel, counterpart);
        let contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        contexts
            .get(&key)
            .cloned()
            .unwrap_or_else(|| ConversationContext::new(self.profile.history_limit))
    }

    fn update_context(&self, channel: &ChannelId, counterpart: &str, f: impl FnOnce(&mut ConversationContext)) {
        let key = Self::context_key(channel, counterpart);
        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        let limit = self.profile.history_limit;
        f(contexts.entry(key).or_insert_with(|| ConversationContext::new(limit)));
    }

    /// One scheduled cycle over every connector.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for connector in &self.connectors {
            let items = match tokio::time::timeout(self.connector_timeout, connector.fetch_new()).await {
                Ok(Ok(items)) => items,
                Ok(Err(e)) => {
                    warn!(avatar = %self.profile.id, connector = connector.name(), error = %e, "Fetch failed");
                    report.fetch_failures += 1;
                    continue;
                }
                Err(_) => {
                    warn!(avatar = %self.profile.id, connector = connector.name(), "Fetch timed out");
                    report.fetch_failures += 1;
                    continue;
                }
            };

            if !items.is_empty() {
                debug!(avatar = %self.profile.id, connector = connector.name(), count = items.len(), "Fetched items");
            }

            for item in items {
                report.fetched += 1;
                match self.process_item(connector.as_ref(), &item).await {
                    ItemOutcome::Replied => report.replied += 1,
                    ItemOutcome::Ignored => report.ignored += 1,
                    ItemOutcome::Failed | ItemOutcome::Empty => report.failed += 1,
                    ItemOutcome::SendFailed => report.send_failures += 1,
                }
            }
        }

        if report.fetched > 0 || report.fetch_failures > 0 {
            info!(avatar = %self.profile.id, ?report, "Cycle complete");
        }
        report
    }

    /// Run the pipeline for one item and deliver the reply.
    pub async fn process_item(&self, connector: &dyn Connector, item: &IncomingItem) -> ItemOutcome {
        let counterpart = item.counterpart().to_string();
        let context = self.context_snapshot(&item.channel, &counterpart);
        let run = self.pipeline.run(&self.profile, &context, item).await;

        let reply = match run.outcome {
            PipelineOutcome::Replied(text) => text,
            PipelineOutcome::Filtered => {
                self.hand_off_ignored(item);
                return ItemOutcome::Ignored;
            }
            PipelineOutcome::NoReply => {
                debug!(avatar = %self.profile.id, item = %item.id, "Nothing to send");
                return ItemOutcome::Empty;
            }
            PipelineOutcome::Failed(e) => {
                error!(avatar = %self.profile.id, item = %item.id, error = %e, "No reply produced");
                return ItemOutcome::Failed;
            }
        };

        let sent = tokio::time::timeout(
            self.connector_timeout,
            connector.send(&item.sender, &reply, item.thread_key.as_deref()),
        )
        .await;

        match sent {
            Ok(Ok(())) => {
                self.update_context(&item.channel, &counterpart, |ctx| ctx.record_exchange(&item.body, &reply));
                info!(avatar = %self.profile.id, channel = %item.channel, to = %item.sender, "Reply sent");
                ItemOutcome::Replied
            }
            Ok(Err(e)) => {
                warn!(avatar = %self.profile.id, item = %item.id, error = %e, "Reply discarded, send failed");
                ItemOutcome::SendFailed
            }
            Err(_) => {
                warn!(avatar = %self.profile.id, item = %item.id, "Reply discarded, send timed out");
                ItemOutcome::SendFailed
            }
        }
    }

    /// Publish an ignored item so another avatar may pick it up.
    fn hand_off_ignored(&self, item: &IncomingItem) {
        let preview: String = item.body.chars().take(PREVIEW_CHARS).collect();
        let mut payload = Map::new();
        payload.insert("channel".into(), Value::String(item.channel.to_string()));
        payload.insert("sender".into(), Value::String(item.sender.clone()));
        if let Some(subject) = &item.subject {
            payload.insert("subject".into(), Value::String(subject.clone()));
        }
        payload.insert("preview".into(), Value::String(preview.clone()));
        payload.insert(
            "text".into(),
            Value::String(format!(
                "{} did not answer a {} message from {}: {}",
                self.profile.name, item.channel, item.sender, preview
            )),
        );

        let event = match &self.profile.escalate_to {
            Some(target) => EventMessage::direct(&self.profile.id, target, payload),
            None => EventMessage::topic(&self.profile.id, ITEM_IGNORED_TOPIC, payload),
        };
        let delivered = self.bus.publish(event);
        debug!(avatar = %self.profile.id, delivered, escalate_to = ?self.profile.escalate_to, "Ignored item handed off");
    }

    /// Subscribe to direct messages and the profile's topics.
    pub fn subscribe(&self) -> Subscription {
        let mut interests = vec![Interest::AddressedToMe];
        interests.extend(self.profile.topics.iter().cloned().map(Interest::Topic));
        self.bus.subscribe(self.profile.id.clone(), interests)
    }

    /// Handle one inbound bus event. Returns the reply text if one was
    /// published back to the sender.
    pub async fn handle_event(&self, event: &EventMessage) -> Option<String> {
        let channel = ChannelId::new(ChannelId::INTERNAL);
        let text = event.text();

        // Replies to our own messages are remembered but never answered.
        if event.in_reply_to.is_some() {
            debug!(avatar = %self.profile.id, from = %event.sender, "Recording reply from avatar");
            self.update_context(&channel, &event.sender, |ctx| ctx.push(TurnRole::Counterpart, text));
            return None;
        }

        let item = IncomingItem::new(ChannelId::INTERNAL, event.sender.clone(), text);
        let context = self.context_snapshot(&channel, &event.sender);
        let run = self.pipeline.run(&self.profile, &context, &item).await;

        match run.outcome {
            PipelineOutcome::Replied(reply) => {
                let mut payload = Map::new();
                payload.insert("text".into(), Value::String(reply.clone()));
                self.bus.publish(EventMessage::reply(event, &self.profile.id, payload));
                self.update_context(&channel, &event.sender, |ctx| ctx.record_exchange(&item.body, &reply));
                info!(avatar = %self.profile.id, to = %event.sender, "Answered avatar event");
                Some(reply)
            }
            PipelineOutcome::Filtered | PipelineOutcome::NoReply => None,
            PipelineOutcome::Failed(e) => {
                error!(avatar = %self.profile.id, from = %event.sender, error = %e, "Event pass failed");
                None
            }
        }
    }

    /// Consume bus events until the task is aborted.
    pub fn spawn_event_loop(self: Arc<Self>) -> JoinHandle<()> {
        let subscription = self.subscribe();
        tokio::spawn(async move {
            loop {
                let event = subscription.recv().await;
                self.handle_event(&event).await;
            }
        })
    }
}

/// Every avatar runtime, keyed by avatar id.
#[derive(Default)]
pub struct AvatarFleet {
    runtimes: HashMap<AvatarId, Arc<AvatarRuntime>>,
}

impl AvatarFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, runtime: AvatarRuntime) {
        self.runtimes.insert(runtime.id().to_string(), Arc::new(runtime));
    }

    pub fn get(&self, id: &str) -> Option<&Arc<AvatarRuntime>> {
        self.runtimes.get(id)
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }

    /// Profiles sorted by id.
    pub fn profiles(&self) -> Vec<AvatarProfile> {
        let mut profiles: Vec<AvatarProfile> = self.runtimes.values().map(|r| r.profile().clone()).collect();
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        profiles
    }

    /// Start one event loop per avatar.
    pub fn spawn_event_loops(&self) -> Vec<JoinHandle<()>> {
        self.runtimes.values().cloned().map(AvatarRuntime::spawn_event_loop).collect()
    }
}

#[async_trait]
impl AvatarRunner for AvatarFleet {
    async fn run_avatar(&self, id: &str) -> CycleReport {
        match self.runtimes.get(id) {
            Some(runtime) => runtime.run_cycle().await,
            None => {
                warn!(avatar = %id, "Run requested for unknown avatar");
                CycleReport::default()
            }
        }
    }
}
