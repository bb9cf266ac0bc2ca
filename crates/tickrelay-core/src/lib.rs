//! Tickrelay I/O core.
//!
//! Synchronous, single-threaded building blocks shared by the relay binary and
//! the lockstep driver.
//!
//! # Components
//!
//! - [`PollGroup`]: level-triggered readiness multiplexer that owns its
//!   registered handlers and dispatches exactly one per step
//! - [`Transport`]: uniform send/receive interface over a fixed set of
//!   participants
//! - [`TcpTransport`]: many participants multiplexed over each TCP
//!   connection, with per-tick write coalescing
//! - [`UdsTransport`]: one `SOCK_SEQPACKET` socket per participant
//! - [`Roster`]: the ordered, fully-known participant set both transports
//!   claim names from during their handshake
//!
//! Every blocking call is tick-bounded by the caller: nothing here spawns
//! threads or applies timeouts.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
pub mod poll;
mod roster;
pub mod seqpacket;
pub mod tcp;
mod transport;
pub mod uds;

pub use error::{PollError, TransportError};
pub use poll::PollGroup;
pub use roster::Roster;
pub use tcp::{TcpAcceptor, TcpTransport};
pub use transport::{Packet, PacketHandler, Transport};
pub use uds::{UdsAcceptor, UdsTransport};
