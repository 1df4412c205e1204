//! # Typed Message Bus for Embedded Systems
//!
//! `myrtio-msgbus` lets independent firmware tasks exchange typed values and
//! timed events without holding references to each other. It is `no_std`,
//! never allocates, and is built on the [Embassy](https://embassy.dev/)
//! synchronization and timer primitives.
//!
//! ## Core Features
//!
//! - **Typed topics:** a [`Topic`] holds one value of a plain-old-data type and
//!   broadcasts it to its subscribers as an [`Envelope`] of
//!   `(command, payload)`.
//! - **Topic registry:** the [`Bus`] finds topics by name or [`TopicId`] and
//!   type-checks cross-task writes with a per-type token, failing with
//!   [`BusError::TypeMismatch`] instead of reinterpreting memory.
//! - **Deadline scheduler:** the [`Scheduler`] delivers payloads once or
//!   periodically after a delay. It sleeps until the earliest deadline or the
//!   next request, whichever comes first.
//! - **Receiver abstraction:** both sides only need a [`Receiver`], anything
//!   that accepts bytes. [`MessageQueue`] is the bounded queue a task owns.
//!
//! ## Architecture
//!
//! ```text
//!  owner task ── set()/notify() ──► Topic ──► Receiver (subscriber queues)
//!                                    ▲
//!  other tasks ── Bus::request_write ┘ (write handler only, no broadcast)
//!
//!  any task ── schedule()/cancel() ──► Scheduler queue ──► run() ──► Receiver
//! ```
//!
//! ## Lifetime Model
//!
//! Topics, the bus and the scheduler are parameterised by the lifetime `'a` of
//! the receivers they deliver to. Firmware uses `'static` and keeps everything
//! in `static` items; because the borrow checker ties every subscription to
//! its receiver, a receiver can never be dropped while still subscribed.
//!
//! ## Logging
//!
//! Diagnostics are emitted through `log` (feature `log`), `defmt` (feature
//! `defmt`) or `esp-println` (feature `esp32-log`), and compile out otherwise.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod bus;
pub mod envelope;
pub mod error;
pub mod receiver;
pub mod scheduler;
pub mod task;
pub mod topic;

// Re-export key types for easier access at the crate root.
pub use bus::{Bus, TopicInfo};
pub use envelope::{Envelope, MAX_MESSAGE_SIZE, MAX_PAYLOAD_SIZE};
pub use error::{BusError, Result};
pub use receiver::{Frame, MessageQueue, Receiver};
pub use scheduler::{ScheduleHandle, Scheduler};
pub use task::{MessageHandler, serve};
pub use topic::{AnyTopic, JsonCodec, Payload, SubscriptionToken, Topic, TopicId, TypeToken};
