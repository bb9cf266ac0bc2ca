//! Stream-socket transport.
//!
//! Many participants share one TCP connection. The connecting side opens the
//! connection with a [`Handshake`] listing the participant names it serves;
//! the list order fixes each name's local index on that connection. The
//! listening side accepts connections until every configured name has been
//! claimed by some handshake.
//!
//! Every message afterwards is framed as `[local index][length][payload]`
//! (see [`FrameHeader`]).
//!
//! # Write coalescing
//!
//! All participants on a connection produce exactly one message per tick, so
//! a connection serving `k` participants appends frames to an outbound buffer
//! and issues one `write_all` on the `k`-th message. Per tick, the number of
//! forced transmissions is the number of connections, not the number of
//! participants. The countdown resets to `k` after each flush; if a tick
//! produces fewer than `k` messages for a connection, its frames wait for the
//! next tick.

use std::{
    fmt::Display,
    io::{Read, Write},
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd},
};

use bytes::BytesMut;
use tickrelay_proto::{FrameHeader, Handshake};

use crate::{
    error::{PollError, TransportError},
    poll::PollGroup,
    roster::Roster,
    transport::{PacketHandler, Transport},
};

/// One TCP connection and the participants multiplexed over it.
struct TcpConnection {
    stream: TcpStream,
    /// Local index -> global index
    local_to_global: Vec<usize>,
    /// Messages still expected before the outbound batch is flushed
    countdown: usize,
    outbound: BytesMut,
    inbound: Vec<u8>,
    flushes: u64,
}

impl TcpConnection {
    fn new(stream: TcpStream, local_to_global: Vec<usize>) -> Self {
        let countdown = local_to_global.len();
        Self {
            stream,
            local_to_global,
            countdown,
            outbound: BytesMut::new(),
            inbound: Vec::new(),
            flushes: 0,
        }
    }

    fn send(&mut self, local_index: u16, payload: &[u8]) -> Result<(), TransportError> {
        FrameHeader::encode_frame(local_index, payload, &mut self.outbound)?;

        self.countdown -= 1;
        if self.countdown == 0 {
            self.stream.write_all(&self.outbound)?;
            self.outbound.clear();
            self.countdown = self.local_to_global.len();
            self.flushes += 1;
            tracing::trace!(fd = self.stream.as_raw_fd(), flushes = self.flushes, "batch flushed");
        }

        Ok(())
    }

    /// Read exactly one framed message and hand it to `handler`.
    fn receive(&mut self, handler: &mut dyn PacketHandler) -> Result<(), TransportError> {
        let header = FrameHeader::read_from(&mut self.stream).map_err(|e| self.closed_or(e))?;

        self.inbound.resize(header.payload_len as usize, 0);
        self.stream.read_exact(&mut self.inbound).map_err(|e| self.closed_or(e.into()))?;

        let global = *self
            .local_to_global
            .get(header.local_index as usize)
            .ok_or(TransportError::UnknownLocalIndex(header.local_index))?;

        tracing::trace!(participant = global, len = self.inbound.len(), "frame received");
        handler.on_packet(global, &self.inbound)
    }

    fn closed_or(&self, err: tickrelay_proto::ProtocolError) -> TransportError {
        if err.is_eof() {
            TransportError::PeerClosed { participants: self.local_to_global.clone() }
        } else {
            err.into()
        }
    }
}

impl AsFd for TcpConnection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

/// Listening half of a stream transport, before the roster is complete.
///
/// Binding and accepting are separate so the caller can announce the bound
/// address before blocking in [`accept_all`](Self::accept_all).
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    roster: Roster,
}

impl TcpAcceptor {
    /// Bind a listener for the given participant names.
    pub fn bind(addr: SocketAddr, names: &[String]) -> Result<Self, TransportError> {
        let roster = Roster::new(names)?;
        let listener = TcpListener::bind(addr)
            .map_err(|source| TransportError::Bind { addr: addr.to_string(), source })?;

        tracing::debug!(%addr, participants = roster.len(), "stream transport listening");
        Ok(Self { listener, roster })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until every participant name has been claimed.
    ///
    /// The listening socket is closed on return.
    ///
    /// # Errors
    ///
    /// Unknown or duplicate names and empty handshakes are fatal.
    pub fn accept_all(mut self) -> Result<TcpTransport, TransportError> {
        let total = self.roster.len();
        let mut routes: Vec<Option<(RawFd, u16)>> = vec![None; total];
        let mut connections = PollGroup::new()?;

        while !self.roster.is_complete() {
            let (mut stream, peer) = self.listener.accept()?;
            stream.set_nodelay(true)?;

            let handshake = Handshake::read_from(&mut stream)?;
            if handshake.names.is_empty() {
                return Err(TransportError::InvalidIdentity(format!(
                    "connection from {peer} declares no participants"
                )));
            }

            let fd = stream.as_raw_fd();
            let mut local_to_global = Vec::with_capacity(handshake.names.len());
            for (local, name) in handshake.names.iter().enumerate() {
                let global = self.roster.claim(name)?;
                routes[global] = Some((fd, local as u16));
                local_to_global.push(global);
                tracing::info!(participant = global, name = %name, %peer, "participant connected");
            }

            connections.add(TcpConnection::new(stream, local_to_global))?;
        }

        let routes = routes
            .into_iter()
            .enumerate()
            .map(|(global, route)| route.ok_or(TransportError::UnknownParticipantIndex(global)))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            participants = total,
            connections = connections.len(),
            "all participants connected"
        );
        Ok(TcpTransport { routes, connections })
    }
}

/// Stream-socket transport over one or more TCP connections.
pub struct TcpTransport {
    /// Global index -> (connection descriptor, local index)
    routes: Vec<(RawFd, u16)>,
    connections: PollGroup<TcpConnection>,
}

impl TcpTransport {
    /// Listen on `0.0.0.0:port` and accept until every name is claimed.
    pub fn listen(port: u16, names: &[String]) -> Result<Self, TransportError> {
        TcpAcceptor::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), names)?.accept_all()
    }

    /// Dial `target` and serve `names` over the single resulting connection.
    ///
    /// Names get local (and global) indices `0..names.len()` in order.
    pub fn connect(
        target: impl ToSocketAddrs + Display,
        names: &[String],
    ) -> Result<Self, TransportError> {
        let roster = Roster::new(names)?;
        let mut stream = TcpStream::connect(&target)
            .map_err(|source| TransportError::Connect { target: target.to_string(), source })?;
        stream.set_nodelay(true)?;

        let handshake = Handshake::new(roster.names().iter().cloned());
        let mut buf = Vec::with_capacity(handshake.encoded_len());
        handshake.encode(&mut buf)?;
        stream.write_all(&buf)?;

        let fd = stream.as_raw_fd();
        let count = roster.len();
        let routes = (0..count).map(|i| (fd, i as u16)).collect();

        let mut connections = PollGroup::new()?;
        connections.add(TcpConnection::new(stream, (0..count).collect()))?;

        tracing::info!(participants = count, "stream transport connected");
        Ok(Self { routes, connections })
    }

    /// Number of underlying TCP connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Forced transmissions across all connections so far.
    pub fn flush_count(&self) -> u64 {
        self.connections.handlers().map(|c| c.flushes).sum()
    }
}

impl Transport for TcpTransport {
    fn participant_count(&self) -> usize {
        self.routes.len()
    }

    fn send_packet(&mut self, participant: usize, payload: &[u8]) -> Result<(), TransportError> {
        let &(fd, local) = self
            .routes
            .get(participant)
            .ok_or(TransportError::UnknownParticipantIndex(participant))?;
        let connection = self.connections.get_mut(fd).ok_or(PollError::NotRegistered(fd))?;

        connection.send(local, payload)
    }

    fn run_once(&mut self, handler: &mut dyn PacketHandler) -> Result<(), TransportError> {
        self.connections.run_once(|connection| connection.receive(handler))
    }
}

impl AsFd for TcpTransport {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.connections.as_fd()
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("participants", &self.routes.len())
            .field("connections", &self.connections.len())
            .finish()
    }
}
