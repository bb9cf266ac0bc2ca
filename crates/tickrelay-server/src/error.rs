//! Relay error types.
//!
//! Configuration errors, handshake violations and the loss of any fabric
//! participant are fatal: they propagate out of [`Relay`](crate::Relay) and
//! terminate the process. Best-effort subscriber loss never surfaces here.

use std::io;

use thiserror::Error;
use tickrelay_core::TransportError;

/// Invalid command line or configuration value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Transport spec has no recognised prefix
    #[error("unrecognized transport type: {0}")]
    UnknownTransport(String),

    /// Port is not a number in 1..=65535
    #[error("invalid port '{0}'")]
    InvalidPort(String),

    /// `tcpc:` target lacks a `HOST:PORT` shape
    #[error("invalid connect target '{0}' (expected HOST:PORT)")]
    InvalidTarget(String),

    /// `uds:` spec without a path
    #[error("local-socket transport requires a path")]
    EmptyPath,

    /// No participant names were given
    #[error("at least one participant name is required")]
    NoParticipants,

    /// A participant name (or one side of a pair) is empty
    #[error("invalid participant name '{0}'")]
    InvalidName(String),
}

/// Errors from the barrier/broadcast sync service.
///
/// Only listener-level failures are reported; a failing subscriber is
/// removed, not escalated.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Listener could not be bound
    #[error("sync server failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying error
        source: io::Error,
    },

    /// Accepting a new subscriber failed for a reason other than "none
    /// pending"
    #[error("sync server accept failed: {0}")]
    Accept(io::Error),

    /// Listener I/O failure
    #[error("sync server i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Which of the two relay fabrics an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fabric {
    /// Upstream fabric (`--upstream`)
    Upstream,
    /// Downstream fabric (`--downstream`)
    Downstream,
}

impl std::fmt::Display for Fabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upstream => f.write_str("upstream"),
            Self::Downstream => f.write_str("downstream"),
        }
    }
}

/// Fatal relay errors.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Bad configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A fabric failed
    #[error("{fabric} transport: {source}")]
    Transport {
        /// Fabric that failed
        fabric: Fabric,
        /// Underlying error
        source: TransportError,
    },

    /// Fabrics disagree on the participant count
    #[error("upstream serves {upstream} participants, downstream serves {downstream}")]
    ParticipantMismatch {
        /// Upstream participant count
        upstream: usize,
        /// Downstream participant count
        downstream: usize,
    },

    /// Sync service failure
    #[error("sync service: {0}")]
    Sync(#[from] SyncError),

    /// Status line could not be written
    #[error("failed to write status line: {0}")]
    Status(#[source] io::Error),
}

impl RelayError {
    /// True if a participant violated a fabric handshake.
    pub fn is_handshake_violation(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_handshake_violation())
    }

    pub(crate) fn upstream(source: TransportError) -> Self {
        Self::Transport { fabric: Fabric::Upstream, source }
    }

    pub(crate) fn downstream(source: TransportError) -> Self {
        Self::Transport { fabric: Fabric::Downstream, source }
    }
}
