//! Error types for readiness multiplexing and transports.
//!
//! Every transport participant is mandatory: there is no recovery path once a
//! participant's channel fails, so callers propagate these errors up to the
//! process boundary.

use std::{io, os::fd::RawFd};

use thiserror::Error;
use tickrelay_proto::ProtocolError;

/// Errors from [`PollGroup`](crate::PollGroup).
#[derive(Error, Debug)]
pub enum PollError {
    /// Descriptor already has a handler
    #[error("descriptor {0} is already registered")]
    AlreadyRegistered(RawFd),

    /// Descriptor has no handler
    #[error("descriptor {0} is not registered")]
    NotRegistered(RawFd),

    /// The kernel refused to add or remove a descriptor
    #[error("failed to update interest list for descriptor {fd}: {source}")]
    Control {
        /// Descriptor being added or removed
        fd: RawFd,
        /// Underlying error
        source: io::Error,
    },

    /// Waiting for readiness failed
    #[error("readiness wait failed: {0}")]
    Wait(io::Error),

    /// Waiting on a group with nothing registered would block forever
    #[error("readiness wait on an empty group")]
    Empty,
}

/// Errors from transport construction, handshakes and packet I/O.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Participant list is unusable (empty, or the same name twice)
    #[error("invalid participant list: {0}")]
    InvalidRoster(String),

    /// Handshake named a participant that is not configured
    #[error("unexpected participant name: {0}")]
    UnknownParticipant(String),

    /// Handshake named a participant that has already connected
    #[error("participant already connected: {0}")]
    DuplicateParticipant(String),

    /// Identity message could not be read as a participant name
    #[error("invalid identity message: {0}")]
    InvalidIdentity(String),

    /// Send addressed a participant this transport does not serve
    #[error("participant {0} is not served by this transport")]
    UnknownParticipantIndex(usize),

    /// Peer framed a message for a local index it never declared
    #[error("frame for undeclared local index {0}")]
    UnknownLocalIndex(u16),

    /// Payload cannot be carried by this transport
    #[error("payload of {size} bytes not allowed (valid: {min}..={max})")]
    PayloadSize {
        /// Rejected size
        size: usize,
        /// Smallest accepted payload
        min: usize,
        /// Largest accepted payload
        max: usize,
    },

    /// A mandatory participant's channel closed
    #[error("connection closed by peer serving participant(s) {participants:?}")]
    PeerClosed {
        /// Global indices served by the closed channel
        participants: Vec<usize>,
    },

    /// Could not bind the listening socket
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address or path being bound
        addr: String,
        /// Underlying error
        source: io::Error,
    },

    /// Could not reach the remote side
    #[error("failed to connect to {target}: {source}")]
    Connect {
        /// Address or path being dialed
        target: String,
        /// Underlying error
        source: io::Error,
    },

    /// Wire format violation
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Readiness multiplexer failure
    #[error("poll error: {0}")]
    Poll(#[from] PollError),

    /// Socket I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// True for handshake violations: the configured participant set and the
    /// connecting peers disagree.
    pub fn is_handshake_violation(&self) -> bool {
        matches!(
            self,
            Self::UnknownParticipant(_) | Self::DuplicateParticipant(_) | Self::InvalidIdentity(_)
        )
    }
}
