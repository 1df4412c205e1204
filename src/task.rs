//! Message-driven task loop.
//!
//! Most tasks on the bus look the same: wait on an inbound [`MessageQueue`],
//! handle each frame, and optionally do something when nothing arrived for a
//! while. [`MessageHandler`] captures the per-task logic and [`serve`] is the
//! loop around it.
//!
//! # Example
//!
//! ```ignore
//! struct Display { temp: f32 }
//!
//! impl MessageHandler for Display {
//!     fn on_message(&mut self, msg: &[u8]) {
//!         if let Some(env) = Envelope::<f32>::decode(msg) {
//!             self.temp = env.payload;
//!         }
//!     }
//!
//!     fn on_timeout(&mut self) {
//!         // redraw, dim the backlight, ...
//!     }
//!
//!     fn receive_timeout(&self) -> Option<Duration> {
//!         Some(Duration::from_secs(5))
//!     }
//! }
//!
//! #[embassy_executor::task]
//! async fn display_task() -> ! {
//!     let mut display = Display { temp: 0.0 };
//!     serve(&DISPLAY_INBOX, &mut display).await
//! }
//! ```

use embassy_time::Duration;

use crate::receiver::MessageQueue;

/// Per-task message handling.
///
/// Handlers run synchronously on the task that owns the queue. They may
/// publish to topics, write through the bus or schedule deliveries, all of
/// which return without waiting.
pub trait MessageHandler {
    /// Handles one received frame.
    fn on_message(&mut self, msg: &[u8]);

    /// Called when no message arrived within [`receive_timeout`](Self::receive_timeout).
    ///
    /// The default implementation does nothing.
    fn on_timeout(&mut self) {}

    /// How long to wait for a message before calling `on_timeout`.
    ///
    /// Asked again before every wait. `None` (the default) waits forever.
    fn receive_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Lets `&mut dyn MessageHandler` be used wherever a handler is expected.
impl<H: MessageHandler + ?Sized> MessageHandler for &mut H {
    fn on_message(&mut self, msg: &[u8]) {
        (**self).on_message(msg)
    }

    fn on_timeout(&mut self) {
        (**self).on_timeout()
    }

    fn receive_timeout(&self) -> Option<Duration> {
        (**self).receive_timeout()
    }
}

/// Receives from `queue` forever, dispatching to `handler`.
pub async fn serve<const DEPTH: usize>(
    queue: &MessageQueue<DEPTH>,
    handler: &mut dyn MessageHandler,
) -> ! {
    loop {
        match handler.receive_timeout() {
            None => {
                let frame = queue.receive().await;
                handler.on_message(&frame);
            }
            Some(timeout) => match queue.receive_timeout(timeout).await {
                Some(frame) => handler.on_message(&frame),
                None => handler.on_timeout(),
            },
        }
    }
}
