//! Lockstep driver for simulation engines.
//!
//! Embedded in an engine process (for example a network simulator), the
//! driver subscribes to the relay's sync service and keeps the engine's clock
//! in step with the rest of the federation. It also serves one companion
//! connection per local entity: a remote process that exchanges application
//! messages with that entity.
//!
//! # Lifecycle
//!
//! ```text
//! register_entity(id)...   every entity starts Pending
//! init()                   connect relay, accept one companion per entity
//! loop {
//!     wait_for_begin_tick(engine)   deliver companion messages until the
//!                                   relay announces the next tick
//!     ...engine advances to the tick timestamp...
//!     end_tick()
//! }
//! ```
//!
//! The engine is reached through the [`Engine`] trait, so the driver owns no
//! simulation state itself.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod driver;
mod engine;
mod error;

pub use config::DriverConfig;
pub use driver::{DELIVERY_DELAY, EntityState, LockstepDriver};
pub use engine::{Engine, TickEvent};
pub use error::DriverError;
