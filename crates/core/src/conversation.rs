//! Bounded per-counterpart conversation history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// Whoever wrote to the avatar
    Counterpart,
    /// The avatar's own reply
    Avatar,
}

/// One message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Prior turns with one counterpart, oldest first.
///
/// Never holds more than `limit` turns: pushing past the limit drops the
/// oldest entries. A limit of zero keeps nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    limit: usize,
    turns: VecDeque<Turn>,
}

impl ConversationContext {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            turns: VecDeque::with_capacity(limit.min(64)),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn push(&mut self, role: TurnRole, text: impl Into<String>) {
        if self.limit == 0 {
            return;
        }
        self.turns.push_back(Turn {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        });
        while self.turns.len() > self.limit {
            self.turns.pop_front();
        }
    }

    /// Record a completed exchange: the item, then the reply that was sent.
    pub fn record_exchange(&mut self, incoming: &str, reply: &str) {
        self.push(TurnRole::Counterpart, incoming);
        self.push(TurnRole::Avatar, reply);
    }

    /// Render as chat messages for a model request.
    pub fn to_messages(&self) -> Vec<Message> {
        self.turns
            .iter()
            .map(|t| match t.role {
                TurnRole::Counterpart => Message::user(t.text.clone()),
                TurnRole::Avatar => Message::assistant(t.text.clone()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn keeps_only_last_turns_after_three_exchanges() {
        let mut ctx = ConversationContext::new(2);
        for i in 1..=3 {
            ctx.record_exchange(&format!("question {i}"), &format!("answer {i}"));
            assert!(ctx.len() <= 2);
        }
        let texts: Vec<&str> = ctx.turns().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["question 3", "answer 3"]);
    }

    #[test]
    fn never_exceeds_limit() {
        let mut ctx = ConversationContext::new(5);
        for i in 0..100 {
            ctx.push(TurnRole::Counterpart, i.to_string());
            assert!(ctx.len() <= 5);
        }
        assert_eq!(ctx.turns().next().map(|t| t.text.as_str()), Some("95"));
    }

    #[test]
    fn zero_limit_keeps_nothing() {
        let mut ctx = ConversationContext::new(0);
        ctx.record_exchange("a", "b");
        assert!(ctx.is_empty());
    }

    #[test]
    fn renders_roles() {
        let mut ctx = ConversationContext::new(4);
        ctx.record_exchange("hi", "hello");
        let msgs = ctx.to_messages();
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[1].role, Role::Assistant);
        assert_eq!(msgs[1].content, "hello");
    }
}
