//! Tickrelay wire protocol.
//!
//! Byte-exact encoders and decoders for every message exchanged by the relay,
//! its transports, the sync service and the lockstep driver. Nothing here
//! touches a socket beyond reading from an [`std::io::Read`] source; the
//! transports in `tickrelay-core` own the I/O.
//!
//! # Formats
//!
//! - [`stream`]: stream-transport handshake and per-message frame header
//!   (big-endian)
//! - [`sync`]: subscription byte, barrier begin-notice and telemetry snapshot
//!   (little-endian)
//! - [`companion`]: lockstep-driver identity handshake and length-prefixed
//!   companion messages (little-endian)
//! - [`state`]: the leading timestamp/position fields of a relayed state
//!   packet (little-endian)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod companion;
mod errors;
pub mod state;
pub mod stream;
pub mod sync;

pub use companion::{CompanionMessage, Destination};
pub use errors::{ProtocolError, Result};
pub use state::{Position, StateHeader};
pub use stream::{FrameHeader, Handshake};
pub use sync::{Snapshot, SubscriptionKind};

/// Single-byte acknowledgment used by the companion channel and the lockstep
/// driver's end-of-tick notice.
pub const ACK: u8 = b'!';
