//! Barrier/broadcast sync service.
//!
//! External observers connect over TCP and subscribe with one byte:
//!
//! - **Barrier** subscribers get a begin-notice from
//!   [`SyncServer::begin_phase`] and must acknowledge it before
//!   [`SyncServer::end_phase`] returns. The relay will not start the next
//!   tick's downstream half until they have.
//! - **Telemetry** subscribers get a position [`Snapshot`] from each
//!   [`SyncServer::broadcast_and_maintain`] call.
//!
//! Any subscriber that fails a send or an ack read is dropped with a warning;
//! the session continues without it. New connections are only picked up
//! inside `broadcast_and_maintain`, so a late joiner first takes part in the
//! tick after it connected.

use std::{
    collections::BTreeMap,
    io::{self, Read, Write},
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream},
};

use bytes::BytesMut;
use tickrelay_proto::{Position, Snapshot, SubscriptionKind, sync::encode_begin_notice};

use crate::error::SyncError;

#[derive(Debug)]
struct Subscriber {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Subscriber {
    fn read_ack(&mut self) -> io::Result<()> {
        let mut ack = [0u8; 1];
        self.stream.read_exact(&mut ack)
    }
}

/// Send `message` to every subscriber, dropping those that fail.
fn send_or_remove(subscribers: &mut Vec<Subscriber>, message: &[u8], kind: SubscriptionKind) {
    subscribers.retain_mut(|sub| match sub.stream.write_all(message) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(peer = %sub.peer, ?kind, error = %e, "send failed, removing subscriber");
            false
        },
    });
}

/// Read one acknowledgment byte from every subscriber, dropping those that
/// fail. Blocks until each remaining subscriber has answered.
fn ack_or_remove(subscribers: &mut Vec<Subscriber>, kind: SubscriptionKind) {
    subscribers.retain_mut(|sub| match sub.read_ack() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(peer = %sub.peer, ?kind, error = %e, "no ack, removing subscriber");
            false
        },
    });
}

/// Barrier and telemetry subscriber sets plus the position table.
///
/// # Invariants
///
/// - A connection is in at most one subscriber set.
/// - `end_phase` returns only after every barrier subscriber still
///   registered has acknowledged.
/// - Snapshot records are ordered by ascending participant id.
#[derive(Debug)]
pub struct SyncServer {
    listener: TcpListener,
    barrier: Vec<Subscriber>,
    telemetry: Vec<Subscriber>,
    positions: BTreeMap<u32, Position>,
    timestamp: f64,
}

impl SyncServer {
    /// Listen on `0.0.0.0:port`.
    pub fn listen(port: u16) -> Result<Self, SyncError> {
        Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }

    /// Listen on `addr`. Port 0 picks an ephemeral port.
    pub fn bind(addr: SocketAddr) -> Result<Self, SyncError> {
        let listener = TcpListener::bind(addr)
            .map_err(|source| SyncError::Bind { addr: addr.to_string(), source })?;
        listener.set_nonblocking(true)?;

        tracing::info!(addr = %listener.local_addr()?, "sync service listening");
        Ok(Self {
            listener,
            barrier: Vec::new(),
            telemetry: Vec::new(),
            positions: BTreeMap::new(),
            timestamp: 0.0,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, SyncError> {
        Ok(self.listener.local_addr()?)
    }

    /// Send the begin-notice for `timestamp` to every barrier subscriber.
    ///
    /// The timestamp is also the one carried by subsequent snapshots.
    pub fn begin_phase(&mut self, timestamp: f64) {
        tracing::trace!(timestamp, subscribers = self.barrier.len(), "begin phase");
        let notice = encode_begin_notice(timestamp);
        send_or_remove(&mut self.barrier, &notice, SubscriptionKind::Barrier);
        self.timestamp = timestamp;
    }

    /// Block until every barrier subscriber has acknowledged the last
    /// begin-notice.
    pub fn end_phase(&mut self) {
        ack_or_remove(&mut self.barrier, SubscriptionKind::Barrier);
    }

    /// Broadcast a snapshot to telemetry subscribers, then accept and
    /// classify any pending connections.
    ///
    /// # Errors
    ///
    /// Only a listener failure other than "no connection pending" is an
    /// error.
    pub fn broadcast_and_maintain(&mut self) -> Result<(), SyncError> {
        if !self.telemetry.is_empty() {
            let snapshot = self.snapshot();
            let mut packet = BytesMut::with_capacity(snapshot.encoded_len());
            match snapshot.encode(&mut packet) {
                Ok(()) => {
                    send_or_remove(&mut self.telemetry, &packet, SubscriptionKind::Telemetry);
                    ack_or_remove(&mut self.telemetry, SubscriptionKind::Telemetry);
                },
                Err(e) => tracing::warn!(error = %e, "snapshot not encodable, broadcast skipped"),
            }
        }

        self.accept_pending()
    }

    fn accept_pending(&mut self) -> Result<(), SyncError> {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SyncError::Accept(e)),
            };

            match Self::classify(stream, peer) {
                Ok((SubscriptionKind::Barrier, sub)) => self.barrier.push(sub),
                Ok((SubscriptionKind::Telemetry, sub)) => self.telemetry.push(sub),
                Err(e) => {
                    tracing::warn!(%peer, error = %e, "invalid subscription, closing connection");
                },
            }
        }
    }

    fn classify(
        mut stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(SubscriptionKind, Subscriber), Box<dyn std::error::Error>> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;

        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte)?;
        let kind = SubscriptionKind::try_from(byte[0])?;

        tracing::info!(%peer, ?kind, "subscriber joined");
        Ok((kind, Subscriber { stream, peer }))
    }

    /// Record the latest position of participant `id`.
    pub fn set_position(&mut self, id: u32, position: Position) {
        self.positions.insert(id, position);
    }

    /// Snapshot of the current timestamp and every known position.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            timestamp: self.timestamp,
            positions: self.positions.iter().map(|(&id, &pos)| (id, pos)).collect(),
        }
    }

    /// Timestamp of the last begin-notice.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Number of registered barrier subscribers.
    pub fn barrier_count(&self) -> usize {
        self.barrier.len()
    }

    /// Number of registered telemetry subscribers.
    pub fn telemetry_count(&self) -> usize {
        self.telemetry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> SyncServer {
        SyncServer::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap()
    }

    #[test]
    fn positions_are_last_write_wins_and_sorted() {
        let mut sync = server();
        sync.set_position(7, Position::new(1.0, 1.0, 1.0));
        sync.set_position(2, Position::new(2.0, 2.0, 2.0));
        sync.set_position(7, Position::new(3.0, 3.0, 3.0));
        sync.begin_phase(4.5);

        let snapshot = sync.snapshot();
        assert_eq!(snapshot.timestamp, 4.5);
        assert_eq!(
            snapshot.positions,
            vec![(2, Position::new(2.0, 2.0, 2.0)), (7, Position::new(3.0, 3.0, 3.0))]
        );
    }

    #[test]
    fn invalid_subscription_byte_closes_connection() {
        let mut sync = server();
        let mut client = TcpStream::connect(sync.local_addr().unwrap()).unwrap();
        client.write_all(&[9]).unwrap();

        sync.broadcast_and_maintain().unwrap();
        assert_eq!(sync.barrier_count(), 0);
        assert_eq!(sync.telemetry_count(), 0);

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn connection_without_subscription_byte_is_dropped() {
        let mut sync = server();
        let client = TcpStream::connect(sync.local_addr().unwrap()).unwrap();
        drop(client);

        sync.broadcast_and_maintain().unwrap();
        assert_eq!(sync.barrier_count() + sync.telemetry_count(), 0);
    }

    #[test]
    fn no_pending_connections_is_not_an_error() {
        let mut sync = server();
        sync.broadcast_and_maintain().unwrap();
        sync.begin_phase(1.0);
        sync.end_phase();
    }
}
