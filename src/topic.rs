//! Typed topics.
//!
//! A [`Topic`] owns one value of type `T` and the list of receivers that want
//! to hear about it. The owning task updates the value and calls
//! [`Topic::notify`]; every subscriber then gets an [`Envelope`] carrying its
//! own message id and a copy of the value.
//!
//! Topics never allocate. Subscriptions live in a fixed array of
//! `MAX_SUBS` slots guarded by the topic's own lock, and delivery happens on
//! a copy of that array so a slow receiver never holds the lock.

use core::any::TypeId;
use core::cell::{Cell, RefCell};

use bytemuck::Pod;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::envelope::{Envelope, MAX_MESSAGE_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::{BusError, Result};
use crate::receiver::{Receiver, same_receiver};

/// Default number of subscriber slots per topic.
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 8;

/// Values a topic can carry: plain old data that may cross tasks.
pub trait Payload: Pod + Send {}

impl<T: Pod + Send> Payload for T {}

/// 32-bit topic identifier, the FNV-1a hash of the topic name.
///
/// Two different names that hash to the same value are indistinguishable;
/// the registry rejects the second one as [`BusError::TopicExists`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TopicId(u32);

impl TopicId {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    /// Hashes `name` into its identifier.
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = Self::FNV_OFFSET;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u32;
            hash = hash.wrapping_mul(Self::FNV_PRIME);
            i += 1;
        }
        Self(hash)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl From<&str> for TopicId {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}

/// Compile-time type token stored next to each registered topic.
///
/// Cross-task writes compare tokens instead of inspecting values, so a write
/// with the wrong type fails cleanly with [`BusError::TypeMismatch`].
///
/// The token is `core::any::TypeId`, which stands in for the address of a
/// per-type static: it is resolved at compile time, needs no allocation and
/// is unique per payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeToken(TypeId);

impl TypeToken {
    pub fn of<T: 'static>() -> Self {
        Self(TypeId::of::<T>())
    }
}

/// Returned by a successful subscribe.
///
/// Each token is unique for the lifetime of its topic: keys are never reused,
/// so a token left over from an earlier subscription cannot remove a newer
/// one, even for the same receiver and message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SubscriptionToken {
    topic: TopicId,
    key: u32,
}

impl SubscriptionToken {
    pub const fn topic(&self) -> TopicId {
        self.topic
    }
}

/// Validates and applies a value written by another task.
pub type WriteHandler<T> = dyn Fn(&T) -> bool + Sync;

/// JSON bridge for a topic's value.
///
/// Both hooks are pure and report failure with `None`. `encode` writes into
/// the caller's buffer and returns the number of bytes used.
pub struct JsonCodec<T> {
    pub encode: fn(&T, &mut [u8]) -> Option<usize>,
    pub decode: fn(&str) -> Option<T>,
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for JsonCodec<T> {}

#[derive(Clone, Copy)]
struct Subscription<'a> {
    receiver: &'a dyn Receiver,
    msg_id: u32,
    key: u32,
}

/// Subscriber slots. Occupied slots are always `slots[..len]`, oldest first.
#[derive(Clone, Copy)]
struct Subscribers<'a, const N: usize> {
    slots: [Option<Subscription<'a>>; N],
    len: usize,
    next_key: u32,
}

impl<'a, const N: usize> Subscribers<'a, N> {
    const fn new() -> Self {
        Self {
            slots: [None; N],
            len: 0,
            next_key: 0,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Subscription<'a>> {
        self.slots[..self.len].iter().flatten()
    }

    fn position(&self, pred: impl Fn(&Subscription<'a>) -> bool) -> Option<usize> {
        self.iter().position(pred)
    }

    fn push(&mut self, receiver: &'a dyn Receiver, msg_id: u32) -> Option<u32> {
        let slot = self.slots.get_mut(self.len)?;
        let key = self.next_key;
        *slot = Some(Subscription {
            receiver,
            msg_id,
            key,
        });
        self.len += 1;
        self.next_key = self.next_key.wrapping_add(1);
        Some(key)
    }

    fn remove(&mut self, index: usize) {
        self.slots[index..self.len].rotate_left(1);
        self.len -= 1;
        self.slots[self.len] = None;
    }

    fn retain(&mut self, keep: impl Fn(&Subscription<'a>) -> bool) -> usize {
        let mut removed = 0;
        let mut i = 0;
        while i < self.len {
            if matches!(&self.slots[i], Some(sub) if !keep(sub)) {
                self.remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
        removed
    }
}

/// A named, typed value plus its subscribers.
///
/// # Ownership
///
/// One task owns the topic and is the only one that changes its value
/// ([`set`](Self::set), [`modify`](Self::modify), [`publish`](Self::publish)).
/// Other tasks ask the owner for changes through
/// [`request_write`](Self::request_write), which only runs the owner's write
/// handler and never broadcasts: the owner decides when to call
/// [`notify`](Self::notify).
///
/// # Example
///
/// ```ignore
/// fn accept_setpoint(value: &f32) -> bool {
///     (5.0..=30.0).contains(value)
/// }
///
/// static TEMP: Topic<'static, f32> = Topic::new("temp", 0.0).with_unit("degC");
/// static SETPOINT: Topic<'static, f32> =
///     Topic::new("setpoint", 21.0).with_write_handler(&accept_setpoint);
///
/// BUS.register(&TEMP)?;
/// BUS.register(&SETPOINT)?;
/// TEMP.set(23.5);
/// let failed = TEMP.notify();
/// ```
pub struct Topic<'a, T: Payload, const MAX_SUBS: usize = DEFAULT_MAX_SUBSCRIBERS> {
    name: &'a str,
    id: TopicId,
    unit: &'a str,
    value: Mutex<CriticalSectionRawMutex, Cell<T>>,
    subscribers: Mutex<CriticalSectionRawMutex, RefCell<Subscribers<'a, MAX_SUBS>>>,
    write_handler: Option<&'a WriteHandler<T>>,
    codec: Option<JsonCodec<T>>,
}

impl<'a, T: Payload, const MAX_SUBS: usize> Topic<'a, T, MAX_SUBS> {
    /// Creates a topic holding `initial`.
    pub const fn new(name: &'a str, initial: T) -> Self {
        const {
            assert!(
                core::mem::size_of::<T>() <= MAX_PAYLOAD_SIZE,
                "topic payload does not fit into a message frame"
            )
        };
        Self {
            name,
            id: TopicId::from_name(name),
            unit: "",
            value: Mutex::new(Cell::new(initial)),
            subscribers: Mutex::new(RefCell::new(Subscribers::new())),
            write_handler: None,
            codec: None,
        }
    }

    /// Attaches a unit or other metadata tag, e.g. `"degC"`.
    pub const fn with_unit(mut self, unit: &'a str) -> Self {
        self.unit = unit;
        self
    }

    /// Accepts writes from other tasks through `handler`.
    pub const fn with_write_handler(mut self, handler: &'a WriteHandler<T>) -> Self {
        self.write_handler = Some(handler);
        self
    }

    pub const fn with_json_codec(mut self, codec: JsonCodec<T>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn id(&self) -> TopicId {
        self.id
    }

    pub fn unit(&self) -> &'a str {
        self.unit
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.value.lock(|v| v.get())
    }

    /// Replaces the value without notifying.
    pub fn set(&self, value: T) {
        self.value.lock(|v| v.set(value));
    }

    /// Edits the value in place without notifying.
    ///
    /// `f` runs inside a critical section; keep it short.
    pub fn modify<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.value.lock(|v| {
            let mut value = v.get();
            let result = f(&mut value);
            v.set(value);
            result
        })
    }

    /// Sends the current value to every subscriber, oldest subscription
    /// first.
    ///
    /// Returns how many subscribers did not accept the whole envelope.
    /// Failed deliveries are not retried and the subscribers stay subscribed.
    pub fn notify(&self) -> usize {
        let snapshot = self.subscribers.lock(|subs| *subs.borrow());
        let payload = self.get();
        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        let mut failures = 0;

        for sub in snapshot.iter() {
            let sent = match Envelope::new(sub.msg_id, payload).encode(&mut buf) {
                Some(len) => sub.receiver.send(&buf[..len]) == len,
                None => false,
            };
            if !sent {
                warn!(
                    "topic {}: delivery to subscriber (msg id {}) failed",
                    self.name,
                    sub.msg_id
                );
                failures += 1;
            }
        }
        failures
    }

    /// Stores `value` and notifies subscribers.
    pub fn publish(&self, value: T) -> usize {
        self.set(value);
        self.notify()
    }

    /// Adds `(receiver, msg_id)` to the subscriber list.
    ///
    /// `receiver` must not be zero-sized; see [`Receiver`].
    pub fn subscribe(&self, receiver: &'a dyn Receiver, msg_id: u32) -> Result<SubscriptionToken> {
        debug_assert!(
            core::mem::size_of_val(receiver) != 0,
            "zero-sized receivers cannot be told apart by address"
        );
        self.subscribers.lock(|subs| {
            let mut subs = subs.borrow_mut();
            if subs
                .position(|s| same_receiver(s.receiver, receiver) && s.msg_id == msg_id)
                .is_some()
            {
                return Err(BusError::SubExists);
            }
            let key = subs.push(receiver, msg_id).ok_or(BusError::SubscribersFull)?;
            Ok(SubscriptionToken { topic: self.id, key })
        })
    }

    /// Removes the `(receiver, msg_id)` subscription.
    pub fn unsubscribe(&self, receiver: &dyn Receiver, msg_id: u32) -> Result<()> {
        self.subscribers.lock(|subs| {
            let mut subs = subs.borrow_mut();
            let index = subs
                .position(|s| same_receiver(s.receiver, receiver) && s.msg_id == msg_id)
                .ok_or(BusError::SubNotFound)?;
            subs.remove(index);
            Ok(())
        })
    }

    /// Removes the subscription `token` was issued for.
    pub fn unsubscribe_token(&self, token: SubscriptionToken) -> Result<()> {
        if token.topic != self.id {
            return Err(BusError::SubNotFound);
        }
        self.subscribers.lock(|subs| {
            let mut subs = subs.borrow_mut();
            let index = subs
                .position(|s| s.key == token.key)
                .ok_or(BusError::SubNotFound)?;
            subs.remove(index);
            Ok(())
        })
    }

    /// Removes every subscription held by `receiver`; returns how many.
    pub fn unsubscribe_receiver(&self, receiver: &dyn Receiver) -> usize {
        self.subscribers
            .lock(|subs| subs.borrow_mut().retain(|s| !same_receiver(s.receiver, receiver)))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock(|subs| subs.borrow().len)
    }

    /// Hands `value` to the owner's write handler.
    ///
    /// Does not notify subscribers.
    pub fn request_write(&self, value: &T) -> Result<()> {
        let handler = self.write_handler.ok_or(BusError::WriteNotSupported)?;
        if handler(value) {
            Ok(())
        } else {
            Err(BusError::WriteFailed)
        }
    }

    /// Encodes the current value as JSON into `out`.
    pub fn encode_json(&self, out: &mut [u8]) -> Result<usize> {
        let codec = self.codec.ok_or(BusError::JsonParseFailed)?;
        (codec.encode)(&self.get(), out).ok_or(BusError::JsonParseFailed)
    }

    /// Decodes `json` and hands the value to the write handler.
    pub fn request_write_json(&self, json: &str) -> Result<()> {
        let codec = self.codec.ok_or(BusError::JsonParseFailed)?;
        let value = (codec.decode)(json).ok_or(BusError::JsonParseFailed)?;
        self.request_write(&value)
    }
}

/// Type-erased view of a topic, as stored by the registry.
pub trait AnyTopic<'a>: Sync {
    fn name(&self) -> &'a str;
    fn id(&self) -> TopicId;
    fn unit(&self) -> &'a str;
    fn type_token(&self) -> TypeToken;
    fn notify(&self) -> usize;
    fn subscribe(&self, receiver: &'a dyn Receiver, msg_id: u32) -> Result<SubscriptionToken>;
    fn unsubscribe(&self, receiver: &dyn Receiver, msg_id: u32) -> Result<()>;
    fn unsubscribe_token(&self, token: SubscriptionToken) -> Result<()>;
    fn unsubscribe_receiver(&self, receiver: &dyn Receiver) -> usize;
    fn subscriber_count(&self) -> usize;
    /// Write request carrying the value as raw bytes.
    ///
    /// Callers check the [`TypeToken`] first; a length mismatch here is still
    /// reported as [`BusError::TypeMismatch`].
    fn request_write_bytes(&self, bytes: &[u8]) -> Result<()>;
    fn encode_json(&self, out: &mut [u8]) -> Result<usize>;
    fn request_write_json(&self, json: &str) -> Result<()>;
}

impl<'a, T: Payload, const MAX_SUBS: usize> AnyTopic<'a> for Topic<'a, T, MAX_SUBS> {
    fn name(&self) -> &'a str {
        self.name
    }

    fn id(&self) -> TopicId {
        self.id
    }

    fn unit(&self) -> &'a str {
        self.unit
    }

    fn type_token(&self) -> TypeToken {
        TypeToken::of::<T>()
    }

    fn notify(&self) -> usize {
        Self::notify(self)
    }

    fn subscribe(&self, receiver: &'a dyn Receiver, msg_id: u32) -> Result<SubscriptionToken> {
        Self::subscribe(self, receiver, msg_id)
    }

    fn unsubscribe(&self, receiver: &dyn Receiver, msg_id: u32) -> Result<()> {
        Self::unsubscribe(self, receiver, msg_id)
    }

    fn unsubscribe_token(&self, token: SubscriptionToken) -> Result<()> {
        Self::unsubscribe_token(self, token)
    }

    fn unsubscribe_receiver(&self, receiver: &dyn Receiver) -> usize {
        Self::unsubscribe_receiver(self, receiver)
    }

    fn subscriber_count(&self) -> usize {
        Self::subscriber_count(self)
    }

    fn request_write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let value: T =
            bytemuck::try_pod_read_unaligned(bytes).map_err(|_| BusError::TypeMismatch)?;
        self.request_write(&value)
    }

    fn encode_json(&self, out: &mut [u8]) -> Result<usize> {
        Self::encode_json(self, out)
    }

    fn request_write_json(&self, json: &str) -> Result<()> {
        Self::request_write_json(self, json)
    }
}
