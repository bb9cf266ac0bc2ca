//! Local-socket transport.
//!
//! One `SOCK_SEQPACKET` Unix socket per participant. The first packet a
//! participant sends is its name; every later packet is one message, passed
//! through without framing since the socket already keeps boundaries.
//!
//! A zero-length packet cannot be told apart from the peer closing its end,
//! so payloads must be at least one byte long in both directions.

use std::{
    os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd},
    path::{Path, PathBuf},
};

use tickrelay_proto::FrameHeader;

use crate::{
    error::{PollError, TransportError},
    poll::PollGroup,
    roster::Roster,
    seqpacket::{SeqPacketListener, SeqPacketSocket},
    transport::{PacketHandler, Transport},
};

/// Longest accepted identity packet.
pub const MAX_NAME_LEN: usize = 255;

/// Largest packet carried in either direction. Equal to the stream frame
/// limit, so any packet accepted here can be forwarded to a stream fabric.
pub const MAX_MESSAGE: usize = FrameHeader::MAX_PAYLOAD;

struct UdsChannel {
    socket: SeqPacketSocket,
    participant: usize,
    inbound: Vec<u8>,
}

impl UdsChannel {
    fn receive(&mut self, handler: &mut dyn PacketHandler) -> Result<(), TransportError> {
        self.inbound.resize(MAX_MESSAGE + 1, 0);
        let len = self.socket.recv(&mut self.inbound)?;

        if len == 0 {
            return Err(TransportError::PeerClosed { participants: vec![self.participant] });
        }
        if len > MAX_MESSAGE {
            return Err(TransportError::PayloadSize { size: len, min: 1, max: MAX_MESSAGE });
        }

        tracing::trace!(participant = self.participant, len, "packet received");
        handler.on_packet(self.participant, &self.inbound[..len])
    }
}

impl AsFd for UdsChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

/// Listening half of a local-socket transport.
#[derive(Debug)]
pub struct UdsAcceptor {
    listener: SeqPacketListener,
    path: PathBuf,
    roster: Roster,
}

impl UdsAcceptor {
    /// Bind the socket file at `path` for the given participant names.
    pub fn bind(path: impl AsRef<Path>, names: &[String]) -> Result<Self, TransportError> {
        let roster = Roster::new(names)?;
        let path = path.as_ref().to_path_buf();
        let listener = SeqPacketListener::bind(&path, roster.len()).map_err(|source| {
            TransportError::Bind { addr: path.display().to_string(), source }
        })?;

        tracing::debug!(
            path = %path.display(),
            participants = roster.len(),
            "local transport listening"
        );
        Ok(Self { listener, path, roster })
    }

    /// Socket file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept one connection per participant, identifying each by its first
    /// packet.
    ///
    /// The socket file is removed once every participant is connected.
    pub fn accept_all(mut self) -> Result<UdsTransport, TransportError> {
        let total = self.roster.len();
        let mut routes: Vec<Option<RawFd>> = vec![None; total];
        let mut channels = PollGroup::new()?;

        let mut identity = [0u8; MAX_NAME_LEN + 1];
        while !self.roster.is_complete() {
            let socket = self.listener.accept()?;

            let len = socket.recv(&mut identity)?;
            if len == 0 || len > MAX_NAME_LEN {
                return Err(TransportError::InvalidIdentity(format!(
                    "identity packet of {len} bytes (valid: 1..={MAX_NAME_LEN})"
                )));
            }
            let name = std::str::from_utf8(&identity[..len])
                .map_err(|_| TransportError::InvalidIdentity("name is not valid UTF-8".into()))?;

            let participant = self.roster.claim(name)?;
            let fd = socket.as_fd().as_raw_fd();
            routes[participant] = Some(fd);
            tracing::info!(participant, name, fd, "participant connected");

            channels.add(UdsChannel { socket, participant, inbound: Vec::new() })?;
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove socket file");
        }

        let routes = routes
            .into_iter()
            .enumerate()
            .map(|(global, route)| route.ok_or(TransportError::UnknownParticipantIndex(global)))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(participants = total, "all participants connected");
        Ok(UdsTransport { routes, channels })
    }
}

/// Local-socket transport: one sequenced-packet socket per participant.
pub struct UdsTransport {
    /// Global index -> socket descriptor
    routes: Vec<RawFd>,
    channels: PollGroup<UdsChannel>,
}

impl UdsTransport {
    /// Bind at `path` and accept until every participant has identified.
    pub fn listen(path: impl AsRef<Path>, names: &[String]) -> Result<Self, TransportError> {
        UdsAcceptor::bind(path, names)?.accept_all()
    }

    /// Connect to a local transport at `path` as participant `name`.
    ///
    /// This is the participant side: the returned socket has already sent its
    /// identity packet.
    pub fn join(path: impl AsRef<Path>, name: &str) -> Result<SeqPacketSocket, TransportError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(TransportError::InvalidIdentity(format!(
                "name of {} bytes (valid: 1..={MAX_NAME_LEN})",
                name.len()
            )));
        }

        let path = path.as_ref();
        let socket = SeqPacketSocket::connect(path).map_err(|source| TransportError::Connect {
            target: path.display().to_string(),
            source,
        })?;
        socket.send(name.as_bytes())?;
        Ok(socket)
    }
}

impl Transport for UdsTransport {
    fn participant_count(&self) -> usize {
        self.routes.len()
    }

    fn send_packet(&mut self, participant: usize, payload: &[u8]) -> Result<(), TransportError> {
        if payload.is_empty() || payload.len() > MAX_MESSAGE {
            let size = payload.len();
            return Err(TransportError::PayloadSize { size, min: 1, max: MAX_MESSAGE });
        }

        let &fd = self
            .routes
            .get(participant)
            .ok_or(TransportError::UnknownParticipantIndex(participant))?;
        let channel = self.channels.get(fd).ok_or(PollError::NotRegistered(fd))?;

        channel.socket.send(payload).map_err(|e| {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                TransportError::PeerClosed { participants: vec![participant] }
            } else {
                e.into()
            }
        })
    }

    fn run_once(&mut self, handler: &mut dyn PacketHandler) -> Result<(), TransportError> {
        self.channels.run_once(|channel| channel.receive(handler))
    }
}

impl AsFd for UdsTransport {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.channels.as_fd()
    }
}

impl std::fmt::Debug for UdsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdsTransport").field("participants", &self.routes.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn identifies_participants_and_removes_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fabric");
        let acceptor = UdsAcceptor::bind(&path, &names(&["a", "b"])).unwrap();
        assert!(path.exists());

        let b = UdsTransport::join(&path, "b").unwrap();
        let a = UdsTransport::join(&path, "a").unwrap();
        let mut transport = acceptor.accept_all().unwrap();
        assert!(!path.exists());

        a.send(b"hello").unwrap();
        let packet = transport.recv_packet().unwrap();
        assert_eq!((packet.participant, &packet.payload[..]), (0, &b"hello"[..]));

        transport.send_packet(1, b"to-b").unwrap();
        let mut buf = [0u8; 16];
        let len = b.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"to-b");
    }

    #[test]
    fn unknown_name_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fabric");
        let acceptor = UdsAcceptor::bind(&path, &names(&["a"])).unwrap();

        let _z = UdsTransport::join(&path, "z").unwrap();
        assert!(matches!(acceptor.accept_all(), Err(TransportError::UnknownParticipant(n)) if n == "z"));
    }

    #[test]
    fn packets_capped_at_stream_frame_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fabric");
        let acceptor = UdsAcceptor::bind(&path, &names(&["a"])).unwrap();
        let a = UdsTransport::join(&path, "a").unwrap();
        let mut transport = acceptor.accept_all().unwrap();

        let largest = vec![0x5Au8; FrameHeader::MAX_PAYLOAD];
        a.send(&largest).unwrap();
        assert_eq!(transport.recv_packet().unwrap().payload.len(), FrameHeader::MAX_PAYLOAD);

        a.send(&[0x5Au8; FrameHeader::MAX_PAYLOAD + 1]).unwrap();
        assert!(matches!(
            transport.recv_packet(),
            Err(TransportError::PayloadSize { size: 65536, max: 65535, .. })
        ));

        assert!(matches!(
            transport.send_packet(0, &[0u8; FrameHeader::MAX_PAYLOAD + 1]),
            Err(TransportError::PayloadSize { size: 65536, .. })
        ));
    }

    #[test]
    fn empty_payload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fabric");
        let acceptor = UdsAcceptor::bind(&path, &names(&["a"])).unwrap();
        let _a = UdsTransport::join(&path, "a").unwrap();
        let mut transport = acceptor.accept_all().unwrap();

        assert!(matches!(
            transport.send_packet(0, b""),
            Err(TransportError::PayloadSize { size: 0, .. })
        ));
    }

    #[test]
    fn participant_hangup_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fabric");
        let acceptor = UdsAcceptor::bind(&path, &names(&["a", "b"])).unwrap();
        let _a = UdsTransport::join(&path, "a").unwrap();
        let b = UdsTransport::join(&path, "b").unwrap();
        let mut transport = acceptor.accept_all().unwrap();

        drop(b);
        let err = transport.recv_packet().unwrap_err();
        assert!(matches!(err, TransportError::PeerClosed { participants } if participants == [1]));
    }

    #[test]
    fn overlong_name_rejected_on_join() {
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            UdsTransport::join("/nonexistent", &long),
            Err(TransportError::InvalidIdentity(_))
        ));
    }
}
