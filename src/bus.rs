//! Topic registry.
//!
//! [`Bus`] maps topic identifiers to registered topics and is how tasks reach
//! topics they do not own: subscribing, asking the owner for a write, reading
//! the value as JSON.
//!
//! # Locking
//!
//! The registry lock guards the id → topic map and nothing else. Every
//! operation copies the topic reference out, releases the registry lock and
//! then works under the topic's own lock, so a busy topic never stalls lookups
//! of unrelated ones.
//!
//! # Lifecycle
//!
//! Registration is insert-only. Once a topic is registered it stays reachable
//! for as long as the bus lives, which is why lookups can hand out plain
//! references. A firmware image keeps one bus in a `static`:
//!
//! ```ignore
//! static BUS: Bus<'static, 16> = Bus::new();
//! static TEMP: Topic<'static, f32> = Topic::new("temp", 0.0);
//!
//! BUS.register(&TEMP)?;
//! BUS.subscribe("temp", &DISPLAY_INBOX, DISPLAY_TEMP)?;
//! ```

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::{LinearMap, Vec};

use crate::error::{BusError, Result};
use crate::receiver::Receiver;
use crate::topic::{AnyTopic, Payload, SubscriptionToken, TopicId, TypeToken};

#[derive(Clone, Copy)]
struct Entry<'a> {
    topic: &'a dyn AnyTopic<'a>,
    token: TypeToken,
}

/// Snapshot of a registered topic, for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicInfo<'a> {
    pub id: TopicId,
    pub name: &'a str,
    pub unit: &'a str,
    pub subscribers: usize,
}

impl<'a> TopicInfo<'a> {
    fn of(topic: &'a dyn AnyTopic<'a>) -> Self {
        Self {
            id: topic.id(),
            name: topic.name(),
            unit: topic.unit(),
            subscribers: topic.subscriber_count(),
        }
    }
}

/// Directory of up to `MAX_TOPICS` topics.
///
/// Every method is safe to call from any task. Topic arguments accept either
/// a [`TopicId`] or the topic's name.
pub struct Bus<'a, const MAX_TOPICS: usize> {
    topics: Mutex<CriticalSectionRawMutex, RefCell<LinearMap<TopicId, Entry<'a>, MAX_TOPICS>>>,
}

impl<'a, const MAX_TOPICS: usize> Bus<'a, MAX_TOPICS> {
    /// Creates an empty registry.
    pub const fn new() -> Self {
        Self {
            topics: Mutex::new(RefCell::new(LinearMap::new())),
        }
    }

    /// Makes `topic` reachable by name and id.
    pub fn register(&self, topic: &'a dyn AnyTopic<'a>) -> Result<TopicId> {
        let name = topic.name();
        if name.is_empty() {
            warn!("bus: refusing to register unnamed topic");
            return Err(BusError::ZeroTopic);
        }
        let id = topic.id();
        let entry = Entry {
            topic,
            token: topic.type_token(),
        };

        self.topics.lock(|topics| {
            let mut topics = topics.borrow_mut();
            if topics.contains_key(&id) {
                warn!("bus: topic {} ({}) already registered", name, id.raw());
                return Err(BusError::TopicExists);
            }
            if topics.insert(id, entry).is_err() {
                warn!("bus: no room for topic {}", name);
                return Err(BusError::RegistryFull);
            }
            info!("bus: registered topic {} ({})", name, id.raw());
            Ok(id)
        })
    }

    fn entry(&self, id: TopicId) -> Option<Entry<'a>> {
        self.topics.lock(|topics| topics.borrow().get(&id).copied())
    }

    fn find(&self, topic: impl Into<TopicId>) -> Result<Entry<'a>> {
        self.entry(topic.into()).ok_or(BusError::TopicNotFound)
    }

    /// The registered topic behind a name or id.
    pub fn topic(&self, topic: impl Into<TopicId>) -> Option<&'a dyn AnyTopic<'a>> {
        self.entry(topic.into()).map(|e| e.topic)
    }

    /// Identifier of a registered topic.
    pub fn topic_id(&self, name: &str) -> Option<TopicId> {
        let id = TopicId::from_name(name);
        self.entry(id).map(|_| id)
    }

    /// Name of a registered topic.
    pub fn topic_name(&self, id: TopicId) -> Option<&'a str> {
        self.entry(id).map(|e| e.topic.name())
    }

    /// Subscribes `receiver` to a topic; deliveries carry `msg_id` as command.
    pub fn subscribe(
        &self,
        topic: impl Into<TopicId>,
        receiver: &'a dyn Receiver,
        msg_id: u32,
    ) -> Result<SubscriptionToken> {
        let entry = self.find(topic)?;
        entry.topic.subscribe(receiver, msg_id).inspect_err(|e| {
            debug!(
                "bus: subscribe to {} (msg id {}) failed: {}",
                entry.topic.name(),
                msg_id,
                e.as_str()
            )
        })
    }

    pub fn unsubscribe(
        &self,
        topic: impl Into<TopicId>,
        receiver: &dyn Receiver,
        msg_id: u32,
    ) -> Result<()> {
        self.find(topic)?.topic.unsubscribe(receiver, msg_id)
    }

    /// Removes the subscription a token was issued for.
    pub fn unsubscribe_token(&self, token: SubscriptionToken) -> Result<()> {
        self.find(token.topic())?.topic.unsubscribe_token(token)
    }

    /// Removes `receiver` from every topic; returns the number of
    /// subscriptions dropped.
    ///
    /// Call this before tearing down a receiver that is not `'static`.
    pub fn unsubscribe_all(&self, receiver: &dyn Receiver) -> usize {
        let entries: Vec<Entry<'a>, MAX_TOPICS> =
            self.topics.lock(|topics| topics.borrow().values().copied().collect());
        entries
            .iter()
            .map(|e| e.topic.unsubscribe_receiver(receiver))
            .sum()
    }

    /// Asks the topic's owner to accept `value`.
    ///
    /// Fails with [`BusError::TypeMismatch`] if `T` is not the topic's type;
    /// the stored value is left alone in that case. Subscribers are not
    /// notified.
    pub fn request_write<T: Payload>(&self, topic: impl Into<TopicId>, value: &T) -> Result<()> {
        let entry = self.find(topic)?;
        if entry.token != TypeToken::of::<T>() {
            warn!("bus: write to {} with wrong type", entry.topic.name());
            return Err(BusError::TypeMismatch);
        }
        entry.topic.request_write_bytes(bytemuck::bytes_of(value))
    }

    /// Decodes `json` with the topic's codec and asks the owner to accept it.
    pub fn request_write_json(&self, topic: impl Into<TopicId>, json: &str) -> Result<()> {
        self.find(topic)?.topic.request_write_json(json)
    }

    /// Encodes the topic's current value as JSON into `out`.
    pub fn to_json(&self, topic: impl Into<TopicId>, out: &mut [u8]) -> Result<usize> {
        self.find(topic)?.topic.encode_json(out)
    }

    /// Broadcasts the topic's current value; returns the failed delivery count.
    pub fn notify(&self, topic: impl Into<TopicId>) -> Result<usize> {
        Ok(self.find(topic)?.topic.notify())
    }

    pub fn topic_info(&self, topic: impl Into<TopicId>) -> Option<TopicInfo<'a>> {
        self.topic(topic).map(TopicInfo::of)
    }

    /// All registered topics in registration order.
    pub fn topic_list(&self) -> Vec<TopicInfo<'a>, MAX_TOPICS> {
        let entries: Vec<Entry<'a>, MAX_TOPICS> =
            self.topics.lock(|topics| topics.borrow().values().copied().collect());
        entries.iter().map(|e| TopicInfo::of(e.topic)).collect()
    }

    pub fn len(&self) -> usize {
        self.topics.lock(|topics| topics.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<const MAX_TOPICS: usize> Default for Bus<'_, MAX_TOPICS> {
    fn default() -> Self {
        Self::new()
    }
}
