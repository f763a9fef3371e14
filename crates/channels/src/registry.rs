//! Connector construction from avatar profiles.
//!
//! Each `[[connectors]]` entry in a profile names a kind. Only the in-process
//! inbox ships with this build; other kinds are logged and skipped so the
//! avatar still loads with whatever connectors are available.

use std::collections::HashMap;
use std::sync::Arc;

use aicrew_core::avatar::{AvatarId, AvatarProfile};
use aicrew_core::channel::Connector;
use tracing::{error, info, warn};

use crate::inbox::{InboxConfig, InboxConnector};

/// Connector kinds a profile may name that need an external protocol
/// implementation.
pub const EXTERNAL_KINDS: &[&str] = &["email", "github", "telegram", "discord", "reddit", "slack"];

/// One avatar's live connectors.
#[derive(Default)]
pub struct ConnectorSet {
    pub connectors: Vec<Arc<dyn Connector>>,
    /// The avatar's inbox, if its profile declares one
    pub inbox: Option<Arc<InboxConnector>>,
}

/// Build the connectors a profile declares.
pub fn build_connectors(profile: &AvatarProfile) -> ConnectorSet {
    let mut set = ConnectorSet::default();

    for spec in &profile.connectors {
        match spec.kind.as_str() {
            "inbox" => {
                if set.inbox.is_some() {
                    warn!(avatar = %profile.id, "Only one inbox per avatar, ignoring the extra one");
                    continue;
                }
                match InboxConfig::from_settings(&spec.settings) {
                    Ok(config) => {
                        info!(avatar = %profile.id, channel = %config.channel, "Inbox connector ready");
                        let inbox = Arc::new(InboxConnector::new(config));
                        set.connectors.push(inbox.clone() as Arc<dyn Connector>);
                        set.inbox = Some(inbox);
                    }
                    Err(e) => error!(avatar = %profile.id, error = %e, "Invalid inbox settings"),
                }
            }
            kind if EXTERNAL_KINDS.contains(&kind) => {
                warn!(avatar = %profile.id, kind, "Connector not available in this build, skipping");
            }
            kind => {
                warn!(avatar = %profile.id, kind, "Unknown connector kind, skipping");
            }
        }
    }

    if set.connectors.is_empty() {
        info!(avatar = %profile.id, "Avatar has no connectors; it will only react to bus events");
    }
    set
}

/// Inboxes addressable over HTTP, by avatar.
#[derive(Default, Clone)]
pub struct InboxRegistry {
    inboxes: HashMap<AvatarId, Arc<InboxConnector>>,
}

impl InboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, avatar: impl Into<AvatarId>, inbox: Arc<InboxConnector>) {
        self.inboxes.insert(avatar.into(), inbox);
    }

    pub fn get(&self, avatar: &str) -> Option<&Arc<InboxConnector>> {
        self.inboxes.get(avatar)
    }

    /// Avatar ids with an inbox, sorted.
    pub fn list(&self) -> Vec<AvatarId> {
        let mut ids: Vec<_> = self.inboxes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inboxes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aicrew_core::avatar::{ConnectorSpec, ScheduleSpec};
    use aicrew_core::provider::ModelOptions;
    use serde_json::{Map, json};

    fn spec(kind: &str, settings: serde_json::Value) -> ConnectorSpec {
        ConnectorSpec {
            kind: kind.into(),
            settings: settings.as_object().cloned().unwrap_or_else(Map::new),
        }
    }

    fn profile(connectors: Vec<ConnectorSpec>) -> AvatarProfile {
        AvatarProfile {
            id: "ada".into(),
            name: "Ada".into(),
            personality: String::new(),
            skills: vec![],
            tools: vec![],
            backend: "ollama".into(),
            model: "llama3:8b".into(),
            options: ModelOptions::default(),
            history_limit: 10,
            rag: false,
            schedule: ScheduleSpec::Interval {
                every_secs: 240,
                jitter_secs: 0,
            },
            active_windows: vec![],
            connectors,
            topics: vec![],
            escalate_to: None,
        }
    }

    #[test]
    fn inbox_is_built_and_exposed() {
        let set = build_connectors(&profile(vec![spec("inbox", json!({"channel": "email"}))]));
        assert_eq!(set.connectors.len(), 1);
        assert_eq!(set.connectors[0].name(), "email");
        assert_eq!(set.inbox.unwrap().channel(), "email");
    }

    #[test]
    fn unavailable_and_unknown_kinds_are_skipped() {
        let set = build_connectors(&profile(vec![
            spec("email", json!({"imap_server": "imap.example.com"})),
            spec("carrier-pigeon", json!({})),
            spec("inbox", json!({})),
        ]));
        assert_eq!(set.connectors.len(), 1);
        assert_eq!(set.connectors[0].name(), "inbox");
    }

    #[test]
    fn second_inbox_and_bad_settings_are_ignored() {
        let set = build_connectors(&profile(vec![
            spec("inbox", json!({"outbox_capacity": -1})),
            spec("inbox", json!({})),
            spec("inbox", json!({"channel": "chat"})),
        ]));
        assert_eq!(set.connectors.len(), 1);
        assert_eq!(set.inbox.unwrap().channel(), "inbox");
    }

    #[test]
    fn no_connectors_is_fine() {
        let set = build_connectors(&profile(vec![]));
        assert!(set.connectors.is_empty());
        assert!(set.inbox.is_none());
    }

    #[test]
    fn registry_lookup() {
        let mut registry = InboxRegistry::new();
        assert!(registry.is_empty());
        registry.register("zed", Arc::new(InboxConnector::new(InboxConfig::default())));
        registry.register("ada", Arc::new(InboxConnector::new(InboxConfig::default())));
        assert_eq!(registry.list(), vec!["ada".to_string(), "zed".to_string()]);
        assert!(registry.get("ada").is_some());
        assert!(registry.get("bob").is_none());
        assert_eq!(registry.len(), 2);
    }
}
