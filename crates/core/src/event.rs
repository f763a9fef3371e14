//! Internal event bus: asynchronous hand-offs between avatars.
//!
//! Every subscription owns a bounded queue. `publish` copies an `Arc` of the
//! message into each matching queue and returns immediately; subscribers
//! drain their own queue on their own task. When a queue is full the oldest
//! undelivered message is dropped and counted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::avatar::AvatarId;

/// Where a message goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EventTarget {
    /// Unicast to one avatar
    Direct(AvatarId),
    /// Broadcast to every subscriber of the topic except the sender
    Topic(String),
}

/// An immutable inter-avatar message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: String,
    pub sender: AvatarId,
    pub target: EventTarget,
    pub payload: Map<String, Value>,

    /// Set on replies; such messages are never answered again
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl EventMessage {
    fn build(sender: impl Into<String>, target: EventTarget, payload: Map<String, Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: sender.into(),
            target,
            payload,
            in_reply_to: None,
            created_at: Utc::now(),
        }
    }

    pub fn direct(sender: impl Into<String>, recipient: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self::build(sender, EventTarget::Direct(recipient.into()), payload)
    }

    pub fn topic(sender: impl Into<String>, topic: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self::build(sender, EventTarget::Topic(topic.into()), payload)
    }

    /// A direct reply from `sender` back to the original publisher.
    pub fn reply(original: &EventMessage, sender: impl Into<String>, payload: Map<String, Value>) -> Self {
        let mut msg = Self::direct(sender, original.sender.clone(), payload);
        msg.in_reply_to = Some(original.id.clone());
        msg
    }

    /// The payload's `text` field, or a JSON rendering of the whole payload.
    pub fn text(&self) -> String {
        match self.payload.get("text").and_then(Value::as_str) {
            Some(t) => t.to_string(),
            None => Value::Object(self.payload.clone()).to_string(),
        }
    }
}

/// What a subscription wants to receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interest {
    AddressedToMe,
    Topic(String),
}

impl Interest {
    fn matches(&self, avatar: &str, msg: &EventMessage) -> bool {
        match (self, &msg.target) {
            (Interest::AddressedToMe, EventTarget::Direct(to)) => to == avatar,
            (Interest::Topic(t), EventTarget::Topic(topic)) => t == topic && msg.sender != avatar,
            _ => false,
        }
    }
}

/// Counters exposed on the admin surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub subscribers: Vec<SubscriberStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberStats {
    pub avatar: AvatarId,
    pub queued: usize,
    pub dropped: u64,
}

struct SubscriberState {
    id: u64,
    avatar: AvatarId,
    interests: Vec<Interest>,
    queue: Mutex<VecDeque<Arc<EventMessage>>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl SubscriberState {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Arc<EventMessage>>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns true if an older message had to be dropped.
    fn enqueue(&self, msg: Arc<EventMessage>) -> bool {
        let dropped = {
            let mut q = self.queue();
            let dropped = if q.len() >= self.capacity {
                q.pop_front();
                true
            } else {
                false
            };
            q.push_back(msg);
            dropped
        };
        if dropped {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        dropped
    }
}

struct BusInner {
    subscribers: Mutex<Vec<Arc<SubscriberState>>>,
    capacity: usize,
    next_id: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl BusInner {
    fn subscribers(&self) -> MutexGuard<'_, Vec<Arc<SubscriberState>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// In-process publish/subscribe bus. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus whose subscriber queues hold `capacity` messages each.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                capacity: capacity.max(1),
                next_id: AtomicU64::new(0),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Fire-and-forget publish. Returns how many subscriptions received it.
    pub fn publish(&self, msg: EventMessage) -> usize {
        let msg = Arc::new(msg);
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let subscribers = self.inner.subscribers();
        let mut delivered = 0;
        for sub in subscribers.iter() {
            if !sub.interests.iter().any(|i| i.matches(&sub.avatar, &msg)) {
                continue;
            }
            if sub.enqueue(msg.clone()) {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(avatar = %sub.avatar, "Event queue full, dropped oldest message");
            }
            delivered += 1;
        }
        drop(subscribers);

        self.inner.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        debug!(event = %msg.id, sender = %msg.sender, target = ?msg.target, delivered, "Event published");
        delivered
    }

    /// Register interest on behalf of `avatar`. Dropping the subscription
    /// unregisters it.
    pub fn subscribe(&self, avatar: impl Into<String>, interests: Vec<Interest>) -> Subscription {
        let state = Arc::new(SubscriberState {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            avatar: avatar.into(),
            interests,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: self.inner.capacity,
            dropped: AtomicU64::new(0),
        });
        self.inner.subscribers().push(state.clone());
        Subscription {
            state,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn stats(&self) -> BusStats {
        let subscribers = self
            .inner
            .subscribers()
            .iter()
            .map(|s| SubscriberStats {
                avatar: s.avatar.clone(),
                queued: s.queue().len(),
                dropped: s.dropped.load(Ordering::Relaxed),
            })
            .collect();
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            subscribers,
        }
    }
}

/// The receiving end of one subscription. Single reader.
pub struct Subscription {
    state: Arc<SubscriberState>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn avatar(&self) -> &str {
        &self.state.avatar
    }

    /// Next message, waiting if the queue is empty.
    pub async fn recv(&self) -> Arc<EventMessage> {
        loop {
            if let Some(msg) = self.try_recv() {
                return msg;
            }
            self.state.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<Arc<EventMessage>> {
        self.state.queue().pop_front()
    }

    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers().retain(|s| s.id != self.state.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn payload(text: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("text".into(), Value::String(text.into()));
        m
    }

    #[tokio::test]
    async fn direct_message_reaches_only_recipient() {
        let bus = EventBus::new(8);
        let b = bus.subscribe("b", vec![Interest::AddressedToMe]);
        let c = bus.subscribe("c", vec![Interest::AddressedToMe]);

        let delivered = bus.publish(EventMessage::direct("a", "b", payload("hand-off")));
        assert_eq!(delivered, 1);

        let msg = b.recv().await;
        assert_eq!(msg.sender, "a");
        assert_eq!(msg.text(), "hand-off");
        assert!(b.try_recv().is_none());
        assert!(c.try_recv().is_none());
    }

    #[tokio::test]
    async fn topic_skips_publisher_and_delivers_once() {
        let bus = EventBus::new(8);
        let a = bus.subscribe("a", vec![Interest::Topic("news".into())]);
        let b = bus.subscribe(
            "b",
            vec![Interest::Topic("news".into()), Interest::Topic("news".into()), Interest::AddressedToMe],
        );

        bus.publish(EventMessage::topic("a", "news", payload("x")));
        assert!(a.try_recv().is_none());
        assert!(b.try_recv().is_some());
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn same_publisher_order_is_preserved() {
        let bus = EventBus::new(16);
        let b = bus.subscribe("b", vec![Interest::AddressedToMe]);
        for i in 0..5 {
            bus.publish(EventMessage::direct("a", "b", payload(&i.to_string())));
        }
        for i in 0..5 {
            assert_eq!(b.recv().await.text(), i.to_string());
        }
    }

    #[test]
    fn full_queue_drops_oldest_and_counts() {
        let bus = EventBus::new(2);
        let b = bus.subscribe("b", vec![Interest::AddressedToMe]);
        for i in 0..4 {
            bus.publish(EventMessage::direct("a", "b", payload(&i.to_string())));
        }
        assert_eq!(b.dropped(), 2);
        assert_eq!(b.try_recv().map(|m| m.text()), Some("2".into()));
        assert_eq!(b.try_recv().map(|m| m.text()), Some("3".into()));

        let stats = bus.stats();
        assert_eq!(stats.published, 4);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.delivered, 4);
    }

    #[tokio::test]
    async fn recv_wakes_on_later_publish() {
        let bus = EventBus::new(4);
        let b = bus.subscribe("b", vec![Interest::AddressedToMe]);
        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(EventMessage::direct("a", "b", payload("late")));
        });
        let msg = tokio::time::timeout(Duration::from_secs(2), b.recv()).await.unwrap();
        assert_eq!(msg.text(), "late");
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let bus = EventBus::new(4);
        let b = bus.subscribe("b", vec![Interest::AddressedToMe]);
        assert_eq!(bus.stats().subscribers.len(), 1);
        drop(b);
        assert_eq!(bus.stats().subscribers.len(), 0);
        assert_eq!(bus.publish(EventMessage::direct("a", "b", payload("x"))), 0);
    }

    #[test]
    fn reply_links_original() {
        let original = EventMessage::direct("a", "b", payload("q"));
        let reply = EventMessage::reply(&original, "b", payload("r"));
        assert_eq!(reply.target, EventTarget::Direct("a".into()));
        assert_eq!(reply.in_reply_to.as_deref(), Some(original.id.as_str()));
    }

    #[test]
    fn text_falls_back_to_json() {
        let mut p = Map::new();
        p.insert("channel".into(), Value::String("email".into()));
        let msg = EventMessage::topic("a", "item_ignored", p);
        assert!(msg.text().contains("\"channel\""));
    }
}
