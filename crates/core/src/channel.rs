//! Connector trait: the abstraction over external channels.
//!
//! A Connector links an avatar to one external channel (email, GitHub, chat,
//! the in-process inbox). The core only needs two operations from it: pull
//! new items and send a reply. Push vs. poll is the connector's business.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::ChannelError;

/// Identifier of a channel kind ("email", "github", "internal", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    /// Channel used for items that arrive over the event bus.
    pub const INTERNAL: &'static str = "internal";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of external input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingItem {
    /// Connector-assigned ID
    pub id: String,

    /// The channel this item came from
    pub channel: ChannelId,

    /// Sender identifier (address, username, avatar id)
    pub sender: String,

    /// Subject or thread title, if the channel has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// The text content
    pub body: String,

    /// Arrival timestamp
    pub received_at: DateTime<Utc>,

    /// Thread/conversation key; history is keyed by this when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_key: Option<String>,
}

impl IncomingItem {
    pub fn new(channel: impl Into<String>, sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel: ChannelId::new(channel),
            sender: sender.into(),
            subject: None,
            body: body.into(),
            received_at: Utc::now(),
            thread_key: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_thread(mut self, key: impl Into<String>) -> Self {
        self.thread_key = Some(key.into());
        self
    }

    /// The key that selects this item's conversation history.
    pub fn counterpart(&self) -> &str {
        self.thread_key.as_deref().unwrap_or(&self.sender)
    }
}

/// The core Connector trait.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Channel kind served by this connector (e.g., "email", "inbox").
    fn name(&self) -> &str;

    /// Items not yet returned by a previous call.
    async fn fetch_new(&self) -> std::result::Result<Vec<IncomingItem>, ChannelError>;

    /// Send a reply to `recipient`, optionally inside a thread.
    async fn send(
        &self,
        recipient: &str,
        text: &str,
        thread: Option<&str>,
    ) -> std::result::Result<(), ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counterpart_prefers_thread_key() {
        let item = IncomingItem::new("email", "alice@example.com", "hi");
        assert_eq!(item.counterpart(), "alice@example.com");
        let item = item.with_thread("issue-12");
        assert_eq!(item.counterpart(), "issue-12");
    }

    #[test]
    fn channel_id_display() {
        let id = ChannelId::new("github");
        assert_eq!(id.to_string(), "github");
        assert_eq!(ChannelId::INTERNAL, "internal");
    }
}
