//! # aicrew core
//!
//! Domain types, traits, and error definitions for the avatar orchestrator.
//! Every collaborator the orchestration core talks to (model backends,
//! connectors, retrieval stores, tools) is defined here as a trait; the
//! implementations live in their own crates.
//!
//! ## Layout
//!
//! - [`provider`]: model backends and their capability report
//! - [`tool`]: tool capability, parameter schemas, and the registry
//! - [`channel`]: connectors and incoming items
//! - [`retrieval`]: knowledge snippets and the retrieval client
//! - [`avatar`]: avatar profiles, schedules, run reports
//! - [`conversation`]: bounded per-counterpart history
//! - [`event`]: the in-process inter-avatar event bus

pub mod error;
pub mod message;
pub mod provider;
pub mod channel;
pub mod tool;
pub mod retrieval;
pub mod avatar;
pub mod conversation;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{ModelOptions, Provider, ProviderRequest, ProviderResponse, ToolDefinition};
pub use channel::{ChannelId, Connector, IncomingItem};
pub use tool::{ParamKind, ParamSpec, Tool, ToolInvocation, ToolRegistry, ToolResult, ToolSpec};
pub use retrieval::{RetrievalClient, RetrievedSnippet};
pub use avatar::{ActiveWindow, AvatarId, ConnectorSpec, AvatarProfile, AvatarRunner, CycleReport, ScheduleSpec};
pub use conversation::{ConversationContext, Turn, TurnRole};
pub use event::{BusStats, EventBus, EventMessage, EventTarget, Interest, SubscriberStats, Subscription};
