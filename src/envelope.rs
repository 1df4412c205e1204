//! # Message Envelope
//!
//! The unit exchanged between tasks: a 32-bit command followed by a
//! trivially-copyable payload, laid out back to back in native byte order.
//! The frame length is always `size_of::<u32>() + size_of::<T>()`.
//!
//! Payloads are [`bytemuck::Pod`], which makes the byte view of any value
//! well-defined without `unsafe` and lets a receiving task rebuild the value
//! from an unaligned frame buffer.

use bytemuck::Pod;

/// Size of the command field at the start of every frame.
pub const COMMAND_SIZE: usize = core::mem::size_of::<u32>();

/// Largest frame any queue or the scheduler will carry.
pub const MAX_MESSAGE_SIZE: usize = 64;

/// Largest payload that fits into a frame next to the command.
pub const MAX_PAYLOAD_SIZE: usize = MAX_MESSAGE_SIZE - COMMAND_SIZE;

/// A `(command, payload)` pair.
///
/// `Envelope<()>` is a command-only message of [`COMMAND_SIZE`] bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope<T: Pod = ()> {
    pub command: u32,
    pub payload: T,
}

impl<T: Pod> Envelope<T> {
    /// Encoded length of an envelope carrying `T`.
    pub const SIZE: usize = COMMAND_SIZE + core::mem::size_of::<T>();

    pub const fn new(command: u32, payload: T) -> Self {
        Self { command, payload }
    }

    /// Encoded length of this envelope.
    pub const fn size(&self) -> usize {
        Self::SIZE
    }

    /// Writes the frame into `buf` and returns its length, or `None` if `buf`
    /// is too small.
    pub fn encode(&self, buf: &mut [u8]) -> Option<usize> {
        let frame = buf.get_mut(..Self::SIZE)?;
        let (command, payload) = frame.split_at_mut(COMMAND_SIZE);
        command.copy_from_slice(&self.command.to_ne_bytes());
        payload.copy_from_slice(bytemuck::bytes_of(&self.payload));
        Some(Self::SIZE)
    }

    /// Rebuilds an envelope from a received frame.
    ///
    /// The frame must be exactly [`Self::SIZE`] bytes long.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        if frame.len() != Self::SIZE {
            return None;
        }
        let (command, payload) = frame.split_at(COMMAND_SIZE);
        Some(Self {
            command: u32::from_ne_bytes(command.try_into().ok()?),
            payload: bytemuck::pod_read_unaligned(payload),
        })
    }
}

impl Envelope<()> {
    /// A message that carries only a command.
    pub const fn command(command: u32) -> Self {
        Self {
            command,
            payload: (),
        }
    }
}

/// Reads the command of a frame without knowing its payload type.
///
/// Tasks that receive several message kinds on one queue dispatch on this
/// before decoding the payload.
pub fn peek_command(frame: &[u8]) -> Option<u32> {
    let command = frame.get(..COMMAND_SIZE)?;
    Some(u32::from_ne_bytes(command.try_into().ok()?))
}
