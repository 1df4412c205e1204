//! # Error Types
//!
//! Result codes returned by the registry and by topics. Every operation is
//! local and synchronous, so a plain enum carries all the information a caller
//! needs; success is `Ok(())`.

use core::fmt;

/// Failure codes for bus and topic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// The topic handed to `register` has no name.
    ZeroTopic,
    /// A topic with the same identifier is already registered.
    TopicExists,
    /// No topic is registered under the requested name or identifier.
    TopicNotFound,
    /// The caller's payload type differs from the type the topic was registered with.
    TypeMismatch,
    /// The `(receiver, message id)` pair is already subscribed to the topic.
    SubExists,
    /// The `(receiver, message id)` pair, or the token, is not subscribed to the topic.
    SubNotFound,
    /// The topic has no write handler.
    WriteNotSupported,
    /// The topic's write handler rejected the value.
    WriteFailed,
    /// The topic has no JSON codec, or encoding/decoding failed.
    JsonParseFailed,
    /// The registry has no room for another topic.
    RegistryFull,
    /// The topic has no room for another subscriber.
    SubscribersFull,
}

impl BusError {
    /// Short, stable name for logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ZeroTopic => "ZERO_TOPIC",
            Self::TopicExists => "TOPIC_EXISTS",
            Self::TopicNotFound => "TOPIC_NOT_FOUND",
            Self::TypeMismatch => "TYPE_MISMATCH",
            Self::SubExists => "SUB_EXISTS",
            Self::SubNotFound => "SUB_NOT_FOUND",
            Self::WriteNotSupported => "WRITE_NOT_SUPPORTED",
            Self::WriteFailed => "WRITE_FAILED",
            Self::JsonParseFailed => "JSON_PARSE_FAILED",
            Self::RegistryFull => "REGISTRY_FULL",
            Self::SubscribersFull => "SUBSCRIBERS_FULL",
        }
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::error::Error for BusError {}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, BusError>;
