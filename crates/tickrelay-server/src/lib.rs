//! Tickrelay lockstep relay.
//!
//! Bridges an upstream and a downstream transport fabric, each carrying one
//! message per participant per tick, through a two-phase tick barrier, and
//! optionally exposes a sync service to external observers.
//!
//! # Components
//!
//! - [`Relay`]: the phase machine that forwards messages between fabrics
//! - [`SyncServer`]: barrier and telemetry subscriber sets
//! - [`RelayConfig`] / [`TransportSpec`]: typed command-line configuration
//! - [`StatusWriter`]: startup milestone lines on standard output

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
mod error;
mod relay;
pub mod status;
pub mod sync;

pub use config::{ParticipantNames, RelayConfig, TransportSpec};
pub use error::{ConfigError, Fabric, RelayError, SyncError};
pub use relay::{Phase, Relay};
pub use status::{Status, StatusWriter};
pub use sync::SyncServer;
