//! Driver configuration.

use std::net::{Ipv4Addr, SocketAddr};

use tickrelay_proto::SubscriptionKind;

/// Default relay sync-service port.
pub const DEFAULT_RELAY_PORT: u16 = 9999;

/// Default companion listen port.
pub const DEFAULT_COMPANION_PORT: u16 = 9998;

/// Lockstep driver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Relay sync service to subscribe to
    pub relay_addr: SocketAddr,
    /// Port companions connect to, on all interfaces (0 picks one)
    pub companion_port: u16,
    /// How the driver subscribes; telemetry notices carry positions
    pub subscription: SubscriptionKind,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            relay_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_RELAY_PORT)),
            companion_port: DEFAULT_COMPANION_PORT,
            subscription: SubscriptionKind::Telemetry,
        }
    }
}
