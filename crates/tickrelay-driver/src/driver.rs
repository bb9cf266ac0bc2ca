//! Lockstep driver state machine.
//!
//! Every entity starts [`EntityState::Pending`] and becomes
//! [`EntityState::Active`] once its companion connects and identifies with
//! the entity id. The relay link and every active companion link share one
//! [`PollGroup`], so a single wait covers both companion traffic and the
//! relay's next tick notice.

use std::{
    collections::{BTreeMap, HashMap},
    io::{Read, Write},
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream},
    os::fd::{AsFd, BorrowedFd, RawFd},
    time::Duration,
};

use bytes::BytesMut;
use tickrelay_core::PollGroup;
use tickrelay_proto::{
    ACK, CompanionMessage, Snapshot, SubscriptionKind,
    companion::{encode_message, read_identity, read_message},
    sync::read_begin_notice,
};

use crate::{
    config::DriverConfig,
    engine::{Engine, TickEvent},
    error::DriverError,
};

/// Simulated delay between a companion handing over a message and the
/// engine delivering it.
pub const DELIVERY_DELAY: Duration = Duration::from_millis(1);

/// Entity lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Registered, companion not yet connected
    Pending,
    /// Companion connected and identified
    Active,
}

#[derive(Debug)]
enum Channel {
    Relay(TcpStream),
    Companion { entity: u32, stream: TcpStream },
}

impl AsFd for Channel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Self::Relay(stream) | Self::Companion { stream, .. } => stream.as_fd(),
        }
    }
}

impl Channel {
    /// Handle one readable event. `Some` ends the wait.
    fn service(
        &mut self,
        subscription: SubscriptionKind,
        engine: &mut impl Engine,
    ) -> Result<Option<TickEvent>, DriverError> {
        match self {
            Self::Companion { entity, stream } => {
                let open = deliver(*entity, stream, engine)?;
                Ok((!open).then_some(TickEvent::Closed))
            },
            Self::Relay(stream) => read_tick(stream, subscription, engine).map(Some),
        }
    }
}

/// Read one companion message, hand it to the engine and acknowledge it.
///
/// Returns `false` if the companion closed the connection.
fn deliver(
    entity: u32,
    stream: &mut TcpStream,
    engine: &mut impl Engine,
) -> Result<bool, DriverError> {
    let payload = match read_message(stream) {
        Ok(payload) => payload,
        Err(e) if e.is_eof() => {
            tracing::warn!(entity, "companion connection closed");
            return Ok(false);
        },
        Err(source) => return Err(DriverError::Companion { entity, source }),
    };

    let message = CompanionMessage::parse(&payload)
        .map_err(|source| DriverError::Companion { entity, source })?;
    tracing::trace!(entity, peer = ?message.peer, len = message.body.len(), "companion message");
    engine.schedule_delivery(DELIVERY_DELAY, entity, message.peer, message.body);

    stream
        .write_all(&[ACK])
        .map_err(|e| DriverError::Companion { entity, source: e.into() })?;
    Ok(true)
}

/// Read one tick notice from the relay, applying any positions it carries.
fn read_tick(
    stream: &mut TcpStream,
    subscription: SubscriptionKind,
    engine: &mut impl Engine,
) -> Result<TickEvent, DriverError> {
    let notice = match subscription {
        SubscriptionKind::Barrier => read_begin_notice(stream),
        SubscriptionKind::Telemetry => Snapshot::read_from(stream).map(|snapshot| {
            for (id, position) in snapshot.positions {
                engine.set_position(id, position);
            }
            snapshot.timestamp
        }),
    };

    match notice {
        Ok(timestamp) => {
            tracing::trace!(timestamp, "begin tick");
            Ok(TickEvent::Begin { timestamp })
        },
        Err(e) if e.is_eof() => {
            tracing::warn!("relay connection closed");
            Ok(TickEvent::Closed)
        },
        Err(e) => Err(DriverError::Relay(e)),
    }
}

/// Per-process lockstep driver.
///
/// Single-threaded: every call blocks the caller until its socket work is
/// done. There is no timeout on any of them.
#[derive(Debug)]
pub struct LockstepDriver {
    config: DriverConfig,
    entities: BTreeMap<u32, EntityState>,
    companions: HashMap<u32, RawFd>,
    channels: PollGroup<Channel>,
    relay: Option<RawFd>,
    listener: Option<TcpListener>,
}

impl LockstepDriver {
    /// Create a driver with no entities and no connections.
    pub fn new(config: DriverConfig) -> Result<Self, DriverError> {
        Ok(Self {
            config,
            entities: BTreeMap::new(),
            companions: HashMap::new(),
            channels: PollGroup::new()?,
            relay: None,
            listener: None,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Register a local entity. It stays pending until its companion
    /// connects.
    pub fn register_entity(&mut self, id: u32) -> Result<(), DriverError> {
        if self.entities.contains_key(&id) {
            return Err(DriverError::DuplicateEntity(id));
        }
        self.entities.insert(id, EntityState::Pending);
        Ok(())
    }

    /// Lifecycle state of entity `id`, if registered.
    pub fn state(&self, id: u32) -> Option<EntityState> {
        self.entities.get(&id).copied()
    }

    /// Entities still waiting for their companion.
    pub fn pending_count(&self) -> usize {
        self.entities.values().filter(|s| **s == EntityState::Pending).count()
    }

    /// Connect to the relay's sync service and subscribe.
    pub fn connect_relay(&mut self) -> Result<(), DriverError> {
        let addr = self.config.relay_addr;
        tracing::info!(%addr, "connecting to relay");

        let mut stream = TcpStream::connect(addr)
            .map_err(|source| DriverError::Connect { addr: addr.to_string(), source })?;
        stream.set_nodelay(true)?;
        stream.write_all(&[self.config.subscription.to_byte()])?;

        self.relay = Some(self.channels.add(Channel::Relay(stream))?);
        tracing::info!(%addr, kind = ?self.config.subscription, "connected to relay");
        Ok(())
    }

    /// Bind the companion listener on all interfaces. Returns the bound
    /// address, which differs from the configured one when port 0 was asked
    /// for.
    pub fn bind_companions(&mut self) -> Result<SocketAddr, DriverError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.companion_port));
        let listener = TcpListener::bind(addr)
            .map_err(|source| DriverError::Bind { addr: addr.to_string(), source })?;

        let local = listener.local_addr()?;
        tracing::info!(addr = %local, "companion listener bound");
        self.listener = Some(listener);
        Ok(local)
    }

    /// Accept companions until every registered entity is active, then close
    /// the listener.
    ///
    /// # Errors
    ///
    /// A companion that identifies as an unregistered or already active
    /// entity is `UnexpectedIdentity`; one that disconnects before
    /// identifying is `Identity`.
    pub fn accept_companions(&mut self) -> Result<(), DriverError> {
        let listener = self.listener.take().ok_or(DriverError::NotBound)?;
        tracing::info!(pending = self.pending_count(), "waiting for companion connections");

        while self.pending_count() > 0 {
            let (mut stream, peer) = listener.accept()?;
            stream.set_nodelay(true)?;
            let entity = read_identity(&mut stream).map_err(DriverError::Identity)?;

            match self.entities.get_mut(&entity) {
                Some(state) if *state == EntityState::Pending => *state = EntityState::Active,
                _ => return Err(DriverError::UnexpectedIdentity(entity)),
            }

            let fd = self.channels.add(Channel::Companion { entity, stream })?;
            self.companions.insert(entity, fd);
            tracing::info!(entity, %peer, "companion connected");
        }

        tracing::info!(companions = self.companions.len(), "all companions connected");
        Ok(())
    }

    /// Connect to the relay, then bind and accept every companion.
    pub fn init(&mut self) -> Result<(), DriverError> {
        self.connect_relay()?;
        self.bind_companions()?;
        self.accept_companions()
    }

    /// Send `payload` to the companion of `entity` and wait for its
    /// acknowledgment.
    pub fn send_message(&mut self, entity: u32, payload: &[u8]) -> Result<(), DriverError> {
        let fd = match self.entities.get(&entity) {
            None => return Err(DriverError::UnknownEntity(entity)),
            Some(EntityState::Pending) => return Err(DriverError::Inactive(entity)),
            Some(EntityState::Active) => {
                *self.companions.get(&entity).ok_or(DriverError::Inactive(entity))?
            },
        };
        let Some(Channel::Companion { stream, .. }) = self.channels.get_mut(fd) else {
            return Err(DriverError::Inactive(entity));
        };

        let mut framed = BytesMut::with_capacity(4 + payload.len());
        encode_message(payload, &mut framed)
            .map_err(|source| DriverError::Companion { entity, source })?;
        stream
            .write_all(&framed)
            .map_err(|e| DriverError::Companion { entity, source: e.into() })?;

        let mut ack = [0u8; 1];
        match stream.read_exact(&mut ack) {
            Ok(()) if ack[0] == ACK => Ok(()),
            _ => Err(DriverError::MissingAck { entity }),
        }
    }

    /// Deliver companion messages to `engine` until the relay announces the
    /// next tick or a connection closes.
    ///
    /// With a telemetry subscription the notice's positions are applied to
    /// the engine before this returns.
    pub fn wait_for_begin_tick<E: Engine>(
        &mut self,
        engine: &mut E,
    ) -> Result<TickEvent, DriverError> {
        if self.relay.is_none() {
            return Err(DriverError::NotConnected);
        }

        let subscription = self.config.subscription;
        loop {
            let serviced =
                self.channels.run_once(|channel| channel.service(subscription, &mut *engine))?;
            if let Some(event) = serviced {
                return Ok(event);
            }
        }
    }

    /// Acknowledge the current tick to the relay.
    pub fn end_tick(&mut self) -> Result<(), DriverError> {
        let fd = self.relay.ok_or(DriverError::NotConnected)?;
        let Some(Channel::Relay(stream)) = self.channels.get_mut(fd) else {
            return Err(DriverError::NotConnected);
        };
        stream.write_all(&[ACK]).map_err(|e| DriverError::Relay(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> LockstepDriver {
        LockstepDriver::new(DriverConfig::default()).unwrap()
    }

    #[test]
    fn entities_start_pending() {
        let mut driver = driver();
        driver.register_entity(3).unwrap();
        driver.register_entity(1).unwrap();

        assert_eq!(driver.state(3), Some(EntityState::Pending));
        assert_eq!(driver.state(2), None);
        assert_eq!(driver.pending_count(), 2);
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut driver = driver();
        driver.register_entity(7).unwrap();
        assert!(matches!(driver.register_entity(7), Err(DriverError::DuplicateEntity(7))));
    }

    #[test]
    fn send_requires_active_companion() {
        let mut driver = driver();
        driver.register_entity(0).unwrap();

        assert!(matches!(driver.send_message(0, b"x"), Err(DriverError::Inactive(0))));
        assert!(matches!(driver.send_message(9, b"x"), Err(DriverError::UnknownEntity(9))));
    }

    #[test]
    fn operations_out_of_order_are_errors() {
        let mut driver = driver();
        assert!(matches!(driver.accept_companions(), Err(DriverError::NotBound)));
        assert!(matches!(driver.end_tick(), Err(DriverError::NotConnected)));
    }
}
