//! Driver error types.

use std::io;

use thiserror::Error;
use tickrelay_core::PollError;
use tickrelay_proto::ProtocolError;

/// Errors from the lockstep driver. All of them end the session.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Entity registered twice
    #[error("entity {0} is already registered")]
    DuplicateEntity(u32),

    /// Entity was never registered
    #[error("entity {0} is not registered")]
    UnknownEntity(u32),

    /// Entity has no companion connected yet
    #[error("entity {0} has no active companion")]
    Inactive(u32),

    /// Companion closed or failed before identifying itself
    #[error("companion identity handshake failed: {0}")]
    Identity(#[source] ProtocolError),

    /// Companion identified as an unknown or already active entity
    #[error("companion identified as unexpected or already active entity {0}")]
    UnexpectedIdentity(u32),

    /// Operation needs the relay link, which is not connected
    #[error("relay link is not connected")]
    NotConnected,

    /// `accept_companions` called before `bind_companions`
    #[error("companion listener is not bound")]
    NotBound,

    /// Relay sync service unreachable
    #[error("failed to connect to relay at {addr}: {source}")]
    Connect {
        /// Relay address
        addr: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Companion listener could not be bound
    #[error("failed to bind companion listener on {addr}: {source}")]
    Bind {
        /// Listen address
        addr: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Companion did not acknowledge a message
    #[error("companion of entity {entity} did not acknowledge")]
    MissingAck {
        /// Entity whose companion failed
        entity: u32,
    },

    /// Companion link failed or sent a malformed message
    #[error("companion of entity {entity}: {source}")]
    Companion {
        /// Entity whose companion failed
        entity: u32,
        /// Underlying error
        #[source]
        source: ProtocolError,
    },

    /// Relay link failed mid-notice
    #[error("relay link: {0}")]
    Relay(#[source] ProtocolError),

    /// Readiness wait failed
    #[error("poll error: {0}")]
    Poll(#[from] PollError),

    /// Other socket failure
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
