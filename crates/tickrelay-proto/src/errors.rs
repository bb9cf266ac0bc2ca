//! Protocol error types.

use std::io;

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding wire messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Buffer ended before a complete message was available
    #[error("message too short: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required to finish decoding
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Payload does not fit in the length field of its frame
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Size of the rejected payload
        size: usize,
        /// Maximum the frame format allows
        max: usize,
    },

    /// Handshake carries more participants than the count field can express
    #[error("too many participants: {0}")]
    TooManyParticipants(usize),

    /// Participant name is not valid UTF-8
    #[error("participant name is not valid UTF-8")]
    InvalidName,

    /// Unknown subscription kind byte
    #[error("invalid subscription kind: {0:#04x}")]
    InvalidSubscription(u8),

    /// Stream read failed or ended early
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// True when the underlying stream ended before the message was complete.
    ///
    /// Callers reading the first byte of a message use this to recognise an
    /// orderly peer shutdown.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof)
    }
}
