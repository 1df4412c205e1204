//! Deferred and periodic message delivery.
//!
//! The [`Scheduler`] sends a payload to a [`Receiver`] once a delay has
//! elapsed, either once or repeatedly. All scheduling state belongs to the
//! task running [`Scheduler::run`]; other tasks only post "add" and "cancel"
//! requests into its inbound channel, so the pending list needs no lock.
//!
//! The loop blocks on that channel with a deadline equal to the earliest
//! pending entry. It therefore wakes once per deadline, and immediately
//! whenever a request arrives, without polling.
//!
//! # Example
//!
//! ```ignore
//! static SCHEDULER: Scheduler<'static, 8, 16> = Scheduler::new();
//!
//! #[embassy_executor::task]
//! async fn scheduler_task() -> ! {
//!     SCHEDULER.run().await
//! }
//!
//! let blink = Envelope::command(BLINK);
//! let handle = SCHEDULER.schedule_envelope(&LED_INBOX, &blink, Duration::from_millis(500), true);
//! // later
//! if let Some(handle) = handle {
//!     SCHEDULER.cancel(handle);
//! }
//! ```
//!
//! # Cancellation
//!
//! `cancel` is best effort. A cancel request that reaches the scheduler
//! before the matching add has been processed finds nothing and is dropped;
//! the add that follows is then scheduled normally.

use core::cell::Cell;
use core::convert::Infallible;
use core::pin::pin;

use bytemuck::Pod;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Timer};
use futures::future::{Either, select};
use heapless::Vec;

use crate::envelope::{Envelope, MAX_MESSAGE_SIZE};
use crate::receiver::{Frame, Receiver};

/// Identifies a scheduled delivery for [`Scheduler::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScheduleHandle(u32);

impl ScheduleHandle {
    pub const fn raw(self) -> u32 {
        self.0
    }
}

pub(crate) struct Entry<'a> {
    handle: ScheduleHandle,
    receiver: &'a dyn Receiver,
    period: Duration,
    next_fire: Instant,
    periodic: bool,
    payload: Frame,
}

impl<'a> Entry<'a> {
    fn new(
        handle: ScheduleHandle,
        receiver: &'a dyn Receiver,
        payload: Frame,
        delay: Duration,
        periodic: bool,
        now: Instant,
    ) -> Self {
        Self {
            handle,
            receiver,
            period: delay,
            next_fire: now + delay,
            periodic,
            payload,
        }
    }

    fn fire(&self) {
        let accepted = self.receiver.send(&self.payload);
        if accepted < self.payload.len() {
            warn!(
                "scheduler: delivery of {} failed ({} of {} bytes accepted)",
                self.handle.0,
                accepted,
                self.payload.len()
            );
        }
    }
}

/// Handle allocation and slot accounting shared by every caller.
///
/// `outstanding` counts entries that are queued as requests or sitting in the
/// pending list, and never exceeds `MAX_ENTRIES`.
#[derive(Clone, Copy)]
struct Slots {
    next_handle: u32,
    outstanding: usize,
}

pub(crate) enum Request<'a> {
    Add(Entry<'a>),
    Cancel(ScheduleHandle),
}

/// Pending deliveries sorted by deadline.
///
/// Entries with equal deadlines keep the order they were inserted in.
pub(crate) struct PendingList<'a, const N: usize> {
    entries: Vec<Entry<'a>, N>,
}

impl<'a, const N: usize> PendingList<'a, N> {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.first().map(|e| e.next_fire)
    }

    pub(crate) fn insert(&mut self, entry: Entry<'a>) -> bool {
        let at = self
            .entries
            .iter()
            .position(|e| e.next_fire > entry.next_fire)
            .unwrap_or(self.entries.len());
        match self.entries.insert(at, entry) {
            Ok(()) => true,
            Err(entry) => {
                warn!("scheduler: pending list full, dropping {}", entry.handle.0);
                false
            }
        }
    }

    pub(crate) fn cancel(&mut self, handle: ScheduleHandle) -> bool {
        match self.entries.iter().position(|e| e.handle == handle) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => {
                debug!("scheduler: cancel of {} matched nothing", handle.0);
                false
            }
        }
    }

    fn apply(&mut self, request: Request<'a>) {
        match request {
            Request::Add(entry) => {
                self.insert(entry);
            }
            Request::Cancel(handle) => {
                self.cancel(handle);
            }
        }
    }

    /// Delivers every entry due at `now`, re-arms periodic ones and returns
    /// the next deadline, or `None` if nothing is pending.
    pub(crate) fn process(&mut self, now: Instant) -> Option<Instant> {
        let due = self
            .entries
            .iter()
            .take_while(|e| e.next_fire <= now)
            .count();

        let mut rearmed: Vec<Entry<'a>, N> = Vec::new();
        for _ in 0..due {
            let mut entry = self.entries.remove(0);
            entry.fire();
            if entry.periodic {
                entry.next_fire = now + entry.period;
                // Cannot overflow: `rearmed` holds at most the `due` entries just removed.
                let _ = rearmed.push(entry);
            }
        }
        for entry in rearmed {
            self.insert(entry);
        }

        self.next_deadline()
    }
}

/// Deadline-ordered delivery service.
///
/// - `QUEUE_DEPTH`: requests that can wait in the inbound channel
/// - `MAX_ENTRIES`: deliveries that can be pending at once
pub struct Scheduler<'a, const QUEUE_DEPTH: usize, const MAX_ENTRIES: usize> {
    requests: Channel<CriticalSectionRawMutex, Request<'a>, QUEUE_DEPTH>,
    slots: Mutex<CriticalSectionRawMutex, Cell<Slots>>,
    running: Mutex<CriticalSectionRawMutex, Cell<bool>>,
}

impl<'a, const QUEUE_DEPTH: usize, const MAX_ENTRIES: usize>
    Scheduler<'a, QUEUE_DEPTH, MAX_ENTRIES>
{
    pub const fn new() -> Self {
        Self {
            requests: Channel::new(),
            slots: Mutex::new(Cell::new(Slots {
                next_handle: 0,
                outstanding: 0,
            })),
            running: Mutex::new(Cell::new(false)),
        }
    }

    /// Claims a pending-list slot and a fresh handle, or `None` if every
    /// slot is taken.
    fn reserve(&self) -> Option<ScheduleHandle> {
        self.slots.lock(|slots| {
            let mut state = slots.get();
            if state.outstanding >= MAX_ENTRIES {
                return None;
            }
            let handle = ScheduleHandle(state.next_handle);
            state.next_handle = state.next_handle.wrapping_add(1);
            state.outstanding += 1;
            slots.set(state);
            Some(handle)
        })
    }

    fn release(&self, count: usize) {
        self.slots.lock(|slots| {
            let mut state = slots.get();
            state.outstanding = state.outstanding.saturating_sub(count);
            slots.set(state);
        });
    }

    /// Delivers `payload` to `receiver` after `delay`, and every `delay`
    /// after that if `periodic` is set.
    ///
    /// Returns `None` without scheduling anything if:
    ///
    /// - the payload is empty or larger than [`MAX_MESSAGE_SIZE`]
    /// - a periodic delivery has a zero period
    /// - `MAX_ENTRIES` deliveries are already pending
    /// - the scheduler's inbound channel is full
    ///
    /// A returned handle always refers to a delivery the scheduler will keep.
    pub fn schedule(
        &self,
        receiver: &'a dyn Receiver,
        payload: &[u8],
        delay: Duration,
        periodic: bool,
    ) -> Option<ScheduleHandle> {
        if payload.is_empty() {
            warn!("scheduler: refusing empty payload");
            return None;
        }
        if periodic && delay.as_ticks() == 0 {
            warn!("scheduler: refusing periodic delivery with zero period");
            return None;
        }
        let Ok(payload) = Frame::from_slice(payload) else {
            warn!(
                "scheduler: payload of {} bytes exceeds {}",
                payload.len(),
                MAX_MESSAGE_SIZE
            );
            return None;
        };

        let Some(handle) = self.reserve() else {
            warn!("scheduler: all {} slots in use", MAX_ENTRIES);
            return None;
        };
        let entry = Entry::new(handle, receiver, payload, delay, periodic, Instant::now());
        match self.requests.try_send(Request::Add(entry)) {
            Ok(()) => Some(handle),
            Err(_) => {
                warn!("scheduler: request queue full, dropping {}", handle.0);
                self.release(1);
                None
            }
        }
    }

    /// Encodes `envelope` and schedules it like [`schedule`](Self::schedule).
    pub fn schedule_envelope<T: Pod>(
        &self,
        receiver: &'a dyn Receiver,
        envelope: &Envelope<T>,
        delay: Duration,
        periodic: bool,
    ) -> Option<ScheduleHandle> {
        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        let len = envelope.encode(&mut buf)?;
        self.schedule(receiver, &buf[..len], delay, periodic)
    }

    /// Asks the scheduler to drop a pending delivery.
    ///
    /// Returns whether the request was queued, not whether a delivery was
    /// actually removed.
    pub fn cancel(&self, handle: ScheduleHandle) -> bool {
        if self.requests.try_send(Request::Cancel(handle)).is_ok() {
            true
        } else {
            warn!("scheduler: request queue full, cancel of {} lost", handle.0);
            false
        }
    }

    /// Runs the scheduling loop.
    ///
    /// Spawn this exactly once per scheduler, on its own task. The pending
    /// list lives inside this future, so a second concurrent `run` would split
    /// adds and cancels between two lists; it logs an error and parks forever
    /// instead.
    pub async fn run(&self) -> ! {
        let already_running = self.running.lock(|running| running.replace(true));
        if already_running {
            error!("scheduler: run() is already active on another task");
            match core::future::pending::<Infallible>().await {}
        }

        let mut pending = PendingList::<'a, MAX_ENTRIES>::new();
        let mut deadline: Option<Instant> = None;

        loop {
            let request = match deadline {
                Some(at) => {
                    match select(pin!(self.requests.receive()), pin!(Timer::at(at))).await {
                        Either::Left((request, _)) => Some(request),
                        Either::Right(((), _)) => None,
                    }
                }
                None => Some(self.requests.receive().await),
            };

            let mut held = pending.len();
            if let Some(request) = request {
                if matches!(request, Request::Add(_)) {
                    held += 1;
                }
                pending.apply(request);
            }
            deadline = pending.process(Instant::now());
            // Fired one-shots and matched cancels give their slots back.
            let freed = held - pending.len();
            if freed > 0 {
                self.release(freed);
            }
            trace!("scheduler: {} pending", pending.len());
        }
    }
}

impl<const QUEUE_DEPTH: usize, const MAX_ENTRIES: usize> Default
    for Scheduler<'_, QUEUE_DEPTH, MAX_ENTRIES>
{
    fn default() -> Self {
        Self::new()
    }
}
