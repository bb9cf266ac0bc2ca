//! Lockstep driver against a real sync service and companion sockets.

use std::{
    io::{Read, Write},
    net::{Ipv4Addr, SocketAddr, TcpStream},
    thread,
    time::Duration,
};

use bytes::Bytes;
use tickrelay_driver::{
    DELIVERY_DELAY, DriverConfig, DriverError, Engine, EntityState, LockstepDriver, TickEvent,
};
use tickrelay_proto::{
    ACK, CompanionMessage, Destination, Position, SubscriptionKind,
    companion::{encode_identity, encode_message, read_message},
};
use tickrelay_server::SyncServer;

#[derive(Debug, Default)]
struct Recorder {
    positions: Vec<(u32, Position)>,
    deliveries: Vec<(Duration, u32, Destination, Bytes)>,
}

impl Engine for Recorder {
    fn set_position(&mut self, id: u32, position: Position) {
        self.positions.push((id, position));
    }

    fn schedule_delivery(
        &mut self,
        delay: Duration,
        source: u32,
        destination: Destination,
        body: Bytes,
    ) {
        self.deliveries.push((delay, source, destination, body));
    }
}

fn sync_server() -> SyncServer {
    SyncServer::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap()
}

fn companion(addr: SocketAddr, id: u32) -> TcpStream {
    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, addr.port())).unwrap();
    stream.write_all(&encode_identity(id)).unwrap();
    stream
}

/// A driver subscribed to `sync` with every entity's companion connected.
fn session(
    sync: &mut SyncServer,
    subscription: SubscriptionKind,
    entities: &[u32],
) -> (LockstepDriver, Vec<TcpStream>) {
    let config = DriverConfig {
        relay_addr: sync.local_addr().unwrap(),
        companion_port: 0,
        subscription,
    };
    let mut driver = LockstepDriver::new(config).unwrap();
    for &id in entities {
        driver.register_entity(id).unwrap();
    }

    driver.connect_relay().unwrap();
    let addr = driver.bind_companions().unwrap();
    let companions = entities.iter().map(|&id| companion(addr, id)).collect();
    driver.accept_companions().unwrap();

    sync.broadcast_and_maintain().unwrap();
    (driver, companions)
}

fn framed(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_message(payload, &mut buf).unwrap();
    buf
}

#[test]
fn barrier_tick_round_trip() {
    let mut sync = sync_server();
    let (mut driver, _companions) = session(&mut sync, SubscriptionKind::Barrier, &[0, 1]);

    assert_eq!(sync.barrier_count(), 1);
    assert_eq!(driver.state(0), Some(EntityState::Active));
    assert_eq!(driver.pending_count(), 0);

    let mut engine = Recorder::default();
    for timestamp in [0.5, 1.0] {
        sync.begin_phase(timestamp);
        let event = driver.wait_for_begin_tick(&mut engine).unwrap();
        assert_eq!(event, TickEvent::Begin { timestamp });
        driver.end_tick().unwrap();
        sync.end_phase();
    }

    assert_eq!(sync.barrier_count(), 1);
    assert!(engine.positions.is_empty());
}

#[test]
fn telemetry_notice_applies_positions() {
    let mut sync = sync_server();
    let (mut driver, _companions) = session(&mut sync, SubscriptionKind::Telemetry, &[0, 1]);
    assert_eq!(sync.telemetry_count(), 1);

    sync.set_position(1, Position::new(4.0, 5.0, 6.0));
    sync.set_position(0, Position::new(1.0, 2.0, 3.0));
    sync.begin_phase(2.25);

    let (event, engine) = thread::scope(|s| {
        let waiter = s.spawn(|| {
            let mut engine = Recorder::default();
            let event = driver.wait_for_begin_tick(&mut engine).unwrap();
            driver.end_tick().unwrap();
            (event, engine)
        });
        sync.broadcast_and_maintain().unwrap();
        waiter.join().unwrap()
    });

    assert_eq!(event, TickEvent::Begin { timestamp: 2.25 });
    assert_eq!(event.as_duration(), Some(Duration::from_millis(2250)));
    assert_eq!(
        engine.positions,
        vec![(0, Position::new(1.0, 2.0, 3.0)), (1, Position::new(4.0, 5.0, 6.0))]
    );
    assert_eq!(sync.telemetry_count(), 1);
}

#[test]
fn companion_messages_are_delivered_before_the_tick() {
    let mut sync = sync_server();
    let (mut driver, mut companions) = session(&mut sync, SubscriptionKind::Barrier, &[3, 4]);

    let engine = thread::scope(|s| {
        let waiter = s.spawn(|| {
            let mut engine = Recorder::default();
            let event = driver.wait_for_begin_tick(&mut engine).unwrap();
            assert_eq!(event, TickEvent::Begin { timestamp: 7.0 });
            engine
        });

        let unicast = CompanionMessage::new(Destination::Entity(3), &b"to-three"[..]);
        companions[1].write_all(&framed(&unicast.to_payload())).unwrap();
        let mut ack = [0u8; 1];
        companions[1].read_exact(&mut ack).unwrap();
        assert_eq!(ack[0], ACK);

        let broadcast = CompanionMessage::new(Destination::Broadcast, &b"all"[..]);
        companions[0].write_all(&framed(&broadcast.to_payload())).unwrap();
        companions[0].read_exact(&mut ack).unwrap();
        assert_eq!(ack[0], ACK);

        sync.begin_phase(7.0);
        waiter.join().unwrap()
    });

    assert_eq!(
        engine.deliveries,
        vec![
            (DELIVERY_DELAY, 4, Destination::Entity(3), Bytes::from_static(b"to-three")),
            (DELIVERY_DELAY, 3, Destination::Broadcast, Bytes::from_static(b"all")),
        ]
    );
}

#[test]
fn outbound_message_waits_for_ack() {
    let mut sync = sync_server();
    let (mut driver, mut companions) = session(&mut sync, SubscriptionKind::Barrier, &[0]);

    thread::scope(|s| {
        let peer = &mut companions[0];
        let reader = s.spawn(move || {
            let got = read_message(&mut *peer).unwrap();
            peer.write_all(&[ACK]).unwrap();
            got
        });

        driver.send_message(0, b"state-update").unwrap();
        assert_eq!(reader.join().unwrap(), b"state-update");
    });
}

#[test]
fn wrong_ack_is_fatal() {
    let mut sync = sync_server();
    let (mut driver, mut companions) = session(&mut sync, SubscriptionKind::Barrier, &[0]);

    // Answer before the message arrives; only the byte value matters.
    companions[0].write_all(b"?").unwrap();
    assert!(matches!(driver.send_message(0, b"x"), Err(DriverError::MissingAck { entity: 0 })));
}

#[test]
fn companion_close_ends_session() {
    let mut sync = sync_server();
    let (mut driver, mut companions) = session(&mut sync, SubscriptionKind::Barrier, &[0, 1]);

    drop(companions.remove(0));
    let mut engine = Recorder::default();
    assert_eq!(driver.wait_for_begin_tick(&mut engine).unwrap(), TickEvent::Closed);
}

#[test]
fn relay_close_ends_session() {
    let mut sync = sync_server();
    let (mut driver, _companions) = session(&mut sync, SubscriptionKind::Barrier, &[0]);

    drop(sync);
    let mut engine = Recorder::default();
    assert_eq!(driver.wait_for_begin_tick(&mut engine).unwrap(), TickEvent::Closed);
}

#[test]
fn malformed_companion_message_is_fatal() {
    let mut sync = sync_server();
    let (mut driver, mut companions) = session(&mut sync, SubscriptionKind::Barrier, &[0]);

    companions[0].write_all(&framed(&[1, 2])).unwrap();
    let mut engine = Recorder::default();
    assert!(matches!(
        driver.wait_for_begin_tick(&mut engine),
        Err(DriverError::Companion { entity: 0, .. })
    ));
}

#[test]
fn oversized_length_claim_then_close_ends_session() {
    let mut sync = sync_server();
    let (mut driver, mut companions) = session(&mut sync, SubscriptionKind::Barrier, &[0]);

    companions[0].write_all(&[0xf0, 0xff, 0xff, 0xff]).unwrap();
    drop(companions.remove(0));
    let mut engine = Recorder::default();
    assert_eq!(driver.wait_for_begin_tick(&mut engine).unwrap(), TickEvent::Closed);
    assert!(engine.deliveries.is_empty());
}

fn accept_with_identities(registered: &[u32], identities: &[u32]) -> DriverError {
    let sync = sync_server();
    let config = DriverConfig {
        relay_addr: sync.local_addr().unwrap(),
        companion_port: 0,
        subscription: SubscriptionKind::Barrier,
    };
    let mut driver = LockstepDriver::new(config).unwrap();
    for &id in registered {
        driver.register_entity(id).unwrap();
    }

    let addr = driver.bind_companions().unwrap();
    let _companions: Vec<_> = identities.iter().map(|&id| companion(addr, id)).collect();
    driver.accept_companions().unwrap_err()
}

#[test]
fn unknown_identity_is_fatal() {
    assert!(matches!(accept_with_identities(&[0], &[5]), DriverError::UnexpectedIdentity(5)));
}

#[test]
fn duplicate_identity_is_fatal() {
    assert!(matches!(
        accept_with_identities(&[0, 1], &[0, 0]),
        DriverError::UnexpectedIdentity(0)
    ));
}

#[test]
fn unreachable_relay_is_an_error() {
    let addr = sync_server().local_addr().unwrap();
    let config = DriverConfig { relay_addr: addr, ..DriverConfig::default() };
    let mut driver = LockstepDriver::new(config).unwrap();

    assert!(matches!(driver.connect_relay(), Err(DriverError::Connect { .. })));
}
