//! Receiver capability and the bounded inbound queue that backs it.
//!
//! The bus and the scheduler only ever see [`Receiver`]: "accept these bytes,
//! report how many were taken". [`MessageQueue`] is the standard
//! implementation, a fixed-depth FIFO of frames built on an Embassy channel,
//! that a task owns and drains from its own loop.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, with_timeout};
use heapless::Vec;

use crate::envelope::MAX_MESSAGE_SIZE;

/// One framed message as stored in a queue.
pub type Frame = Vec<u8, MAX_MESSAGE_SIZE>;

/// Anything that can accept an encoded envelope.
///
/// `send` must not block for longer than a bounded time: it is called from
/// the publishing task inside `Topic::notify` and from the scheduler loop.
/// Returning less than `msg.len()` (usually `0`) reports a failed delivery.
///
/// Implementations must be `Sync` because a single receiver is shared between
/// the bus, the scheduler and the owning task.
///
/// Subscriptions identify receivers by address, so implementors must not be
/// zero-sized: two distinct zero-sized values may share an address and would
/// be mistaken for one another. Topics check this with a debug assertion.
pub trait Receiver: Sync {
    /// Offers `msg` to the receiver and returns the number of bytes accepted.
    fn send(&self, msg: &[u8]) -> usize;
}

/// Returns `true` if both references point at the same receiver object.
///
/// Subscriptions are keyed by receiver identity, not by value. Only the
/// address is compared, which is why [`Receiver`] implementors must have a
/// non-zero size.
pub fn same_receiver(a: &dyn Receiver, b: &dyn Receiver) -> bool {
    core::ptr::addr_eq(a, b)
}

/// A task's inbound message queue.
///
/// Holds up to `DEPTH` frames of at most [`MAX_MESSAGE_SIZE`] bytes each.
/// Frames keep their exact length, so the owner can tell message kinds apart
/// by size as well as by command.
///
/// # Example
///
/// ```ignore
/// static INBOX: MessageQueue<8> = MessageQueue::new();
///
/// bus.subscribe("temp", &INBOX, TEMP_CHANGED)?;
/// loop {
///     let frame = INBOX.receive().await;
///     // decode with Envelope::<f32>::decode(&frame)
/// }
/// ```
pub struct MessageQueue<const DEPTH: usize> {
    channel: Channel<CriticalSectionRawMutex, Frame, DEPTH>,
}

impl<const DEPTH: usize> MessageQueue<DEPTH> {
    /// Creates an empty queue.
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Queues `msg` without waiting.
    ///
    /// Returns `false` if the queue is full or `msg` is longer than a frame.
    pub fn try_send(&self, msg: &[u8]) -> bool {
        let Ok(frame) = Frame::from_slice(msg) else {
            warn!("queue: message of {} bytes exceeds frame size", msg.len());
            return false;
        };
        self.channel.try_send(frame).is_ok()
    }

    /// Queues `msg`, waiting up to `timeout` for free space.
    pub async fn send_timeout(&self, msg: &[u8], timeout: Duration) -> bool {
        let Ok(frame) = Frame::from_slice(msg) else {
            warn!("queue: message of {} bytes exceeds frame size", msg.len());
            return false;
        };
        with_timeout(timeout, self.channel.send(frame)).await.is_ok()
    }

    /// Waits for the next frame.
    pub async fn receive(&self) -> Frame {
        self.channel.receive().await
    }

    /// Waits up to `timeout` for the next frame.
    pub async fn receive_timeout(&self, timeout: Duration) -> Option<Frame> {
        with_timeout(timeout, self.channel.receive()).await.ok()
    }

    /// Takes the next frame if one is queued.
    pub fn try_receive(&self) -> Option<Frame> {
        self.channel.try_receive().ok()
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    /// Number of frames that can still be queued.
    pub fn free_capacity(&self) -> usize {
        self.channel.free_capacity()
    }

    /// Drops every queued frame.
    pub fn clear(&self) {
        self.channel.clear();
    }
}

impl<const DEPTH: usize> Default for MessageQueue<DEPTH> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const DEPTH: usize> Receiver for MessageQueue<DEPTH> {
    fn send(&self, msg: &[u8]) -> usize {
        if self.try_send(msg) { msg.len() } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn send_accepts_full_frame_until_queue_is_full() {
        let queue = MessageQueue::<2>::new();

        assert_eq!(queue.send(&[1, 2, 3]), 3);
        assert_eq!(queue.send(&[4]), 1);
        assert_eq!(queue.send(&[5]), 0);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.free_capacity(), 0);
    }

    #[test]
    fn frames_keep_order_and_length() {
        let queue = MessageQueue::<4>::new();
        queue.send(&[1, 2, 3]);
        queue.send(&[9]);

        assert_eq!(queue.try_receive().as_deref(), Some(&[1u8, 2, 3][..]));
        assert_eq!(queue.try_receive().as_deref(), Some(&[9u8][..]));
        assert!(queue.try_receive().is_none());
    }

    #[test]
    fn oversized_message_is_rejected() {
        let queue = MessageQueue::<4>::new();
        let big = [0u8; MAX_MESSAGE_SIZE + 1];

        assert_eq!(queue.send(&big), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn receive_timeout_expires_on_empty_queue() {
        let queue = MessageQueue::<1>::new();
        let got = block_on(queue.receive_timeout(Duration::from_millis(10)));
        assert!(got.is_none());
    }

    #[test]
    fn send_timeout_gives_up_when_full() {
        let queue = MessageQueue::<1>::new();
        assert!(queue.try_send(&[1]));

        let sent = block_on(queue.send_timeout(&[2], Duration::from_millis(10)));

        assert!(!sent);
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn identity_is_by_address() {
        let a = MessageQueue::<1>::new();
        let b = MessageQueue::<1>::new();

        assert!(same_receiver(&a, &a));
        assert!(!same_receiver(&a, &b));
    }

    #[test]
    fn receivers_of_different_types_are_distinct() {
        struct Counting(core::sync::atomic::AtomicUsize);

        impl Receiver for Counting {
            fn send(&self, msg: &[u8]) -> usize {
                self.0.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
                msg.len()
            }
        }

        let queue = MessageQueue::<1>::new();
        let counting = Counting(core::sync::atomic::AtomicUsize::new(0));

        assert!(!same_receiver(&queue, &counting));
        assert!(same_receiver(&counting, &counting));
    }
}
