//! Inbox connector.
//!
//! An in-process connector fed over HTTP: items pushed into the inbox are
//! returned by the next `fetch_new` exactly once, and replies land in a
//! bounded outbox that the admin surface drains.

use async_trait::async_trait;
use aicrew_core::channel::{ChannelId, Connector, IncomingItem};
use aicrew_core::error::ChannelError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Inbox connector configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxConfig {
    /// Channel id stamped on pushed items. Setting it to "email" makes the
    /// pipeline filter inbox items like mail.
    pub channel: String,
    /// Oldest replies are dropped past this many.
    pub outbox_capacity: usize,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            channel: "inbox".into(),
            outbox_capacity: 100,
        }
    }
}

impl InboxConfig {
    /// Read `channel` and `outbox_capacity` from a profile's connector settings.
    pub fn from_settings(settings: &Map<String, Value>) -> Result<Self, ChannelError> {
        let mut config = Self::default();
        if let Some(value) = settings.get("channel") {
            let channel = value
                .as_str()
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| ChannelError::NotConfigured("inbox 'channel' must be a non-empty string".into()))?;
            config.channel = channel.trim().to_string();
        }
        if let Some(value) = settings.get("outbox_capacity") {
            let capacity = value
                .as_u64()
                .filter(|c| *c > 0)
                .ok_or_else(|| ChannelError::NotConfigured("inbox 'outbox_capacity' must be a positive integer".into()))?;
            config.outbox_capacity = capacity as usize;
        }
        Ok(config)
    }
}

/// A message pushed into an inbox over HTTP.
#[derive(Debug, Clone, Deserialize)]
pub struct InboxMessage {
    pub sender: String,
    pub body: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub thread: Option<String>,
}

/// A reply sent through an inbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentReply {
    pub recipient: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    pub sent_at: DateTime<Utc>,
}

pub struct InboxConnector {
    config: InboxConfig,
    pending: Mutex<VecDeque<IncomingItem>>,
    outbox: Mutex<VecDeque<SentReply>>,
}

impl InboxConnector {
    pub fn new(config: InboxConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(VecDeque::new()),
            outbox: Mutex::new(VecDeque::new()),
        }
    }

    pub fn channel(&self) -> &str {
        &self.config.channel
    }

    /// Queue a message for the next fetch. Returns the new item's id.
    pub fn push(&self, message: InboxMessage) -> String {
        let mut item = IncomingItem::new(self.config.channel.clone(), message.sender, message.body);
        item.subject = message.subject;
        item.thread_key = message.thread;
        let id = item.id.clone();
        self.push_item(item);
        id
    }

    /// Queue a prebuilt item; its channel is rewritten to this inbox's.
    pub fn push_item(&self, mut item: IncomingItem) {
        item.channel = ChannelId::new(self.config.channel.clone());
        debug!(channel = %self.config.channel, item = %item.id, "Inbox item queued");
        lock(&self.pending).push_back(item);
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Take every reply sent since the last drain, oldest first.
    pub fn drain_outbox(&self) -> Vec<SentReply> {
        lock(&self.outbox).drain(..).collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl Connector for InboxConnector {
    fn name(&self) -> &str {
        &self.config.channel
    }

    async fn fetch_new(&self) -> Result<Vec<IncomingItem>, ChannelError> {
        Ok(lock(&self.pending).drain(..).collect())
    }

    async fn send(&self, recipient: &str, text: &str, thread: Option<&str>) -> Result<(), ChannelError> {
        let mut outbox = lock(&self.outbox);
        if outbox.len() >= self.config.outbox_capacity {
            outbox.pop_front();
            warn!(channel = %self.config.channel, "Outbox full, dropped oldest reply");
        }
        outbox.push_back(SentReply {
            recipient: recipient.into(),
            text: text.into(),
            thread: thread.map(str::to_string),
            sent_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(sender: &str, body: &str) -> InboxMessage {
        InboxMessage {
            sender: sender.into(),
            body: body.into(),
            subject: None,
            thread: None,
        }
    }

    #[tokio::test]
    async fn items_are_fetched_exactly_once() {
        let inbox = InboxConnector::new(InboxConfig::default());
        inbox.push(message("bob", "one"));
        inbox.push(message("carol", "two"));
        assert_eq!(inbox.pending_len(), 2);

        let items = inbox.fetch_new().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].body, "one");
        assert_eq!(items[1].sender, "carol");
        assert_eq!(items[0].channel.as_str(), "inbox");

        assert!(inbox.fetch_new().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pushed_fields_carry_over() {
        let inbox = InboxConnector::new(InboxConfig {
            channel: "email".into(),
            ..Default::default()
        });
        let id = inbox.push(InboxMessage {
            sender: "bob@example.com".into(),
            body: "hello".into(),
            subject: Some("Hi".into()),
            thread: Some("t-1".into()),
        });

        let item = inbox.fetch_new().await.unwrap().remove(0);
        assert_eq!(item.id, id);
        assert_eq!(item.channel.as_str(), "email");
        assert_eq!(item.subject.as_deref(), Some("Hi"));
        assert_eq!(item.counterpart(), "t-1");
        assert_eq!(inbox.name(), "email");
    }

    #[tokio::test]
    async fn outbox_is_bounded_and_drained() {
        let inbox = InboxConnector::new(InboxConfig {
            outbox_capacity: 2,
            ..Default::default()
        });
        for n in 0..3 {
            inbox.send("bob", &format!("reply {n}"), None).await.unwrap();
        }

        let sent = inbox.drain_outbox();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].text, "reply 1");
        assert_eq!(sent[1].text, "reply 2");
        assert!(inbox.drain_outbox().is_empty());
    }

    #[test]
    fn settings_parsing() {
        let settings = json!({"channel": "github", "outbox_capacity": 5});
        let config = InboxConfig::from_settings(settings.as_object().unwrap()).unwrap();
        assert_eq!(config.channel, "github");
        assert_eq!(config.outbox_capacity, 5);

        let defaults = InboxConfig::from_settings(&Map::new()).unwrap();
        assert_eq!(defaults, InboxConfig::default());

        let bad = json!({"outbox_capacity": 0});
        assert!(InboxConfig::from_settings(bad.as_object().unwrap()).is_err());
        let bad = json!({"channel": 7});
        assert!(InboxConfig::from_settings(bad.as_object().unwrap()).is_err());
    }
}
