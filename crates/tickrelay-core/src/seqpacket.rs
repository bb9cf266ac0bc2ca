//! Blocking `SOCK_SEQPACKET` Unix-domain sockets.
//!
//! The standard library only offers stream and datagram Unix sockets.
//! Sequenced-packet sockets are connection-oriented like streams but keep
//! message boundaries like datagrams: one `send` is one `recv` on the peer.

use std::{
    io,
    os::fd::{AsFd, BorrowedFd, OwnedFd},
    path::Path,
};

use rustix::{
    io::Errno,
    net::{
        AddressFamily, RecvFlags, SendFlags, SocketAddrUnix, SocketFlags, SocketType, accept_with,
        bind_unix, connect_unix, listen, recv, send, socket_with,
    },
};

fn seqpacket_socket() -> io::Result<OwnedFd> {
    Ok(socket_with(AddressFamily::UNIX, SocketType::SEQPACKET, SocketFlags::CLOEXEC, None)?)
}

fn retry<T>(mut op: impl FnMut() -> Result<T, Errno>) -> io::Result<T> {
    loop {
        match op() {
            Err(Errno::INTR) => continue,
            other => return Ok(other?),
        }
    }
}

/// Listening sequenced-packet socket bound to a filesystem path.
#[derive(Debug)]
pub struct SeqPacketListener {
    fd: OwnedFd,
}

impl SeqPacketListener {
    /// Bind to `path` and start listening with room for `backlog` pending
    /// connections.
    pub fn bind(path: impl AsRef<Path>, backlog: usize) -> io::Result<Self> {
        let fd = seqpacket_socket()?;
        let addr = SocketAddrUnix::new(path.as_ref())?;
        bind_unix(&fd, &addr)?;
        listen(&fd, i32::try_from(backlog).unwrap_or(i32::MAX))?;
        Ok(Self { fd })
    }

    /// Block until a peer connects.
    pub fn accept(&self) -> io::Result<SeqPacketSocket> {
        let fd = retry(|| accept_with(&self.fd, SocketFlags::CLOEXEC))?;
        Ok(SeqPacketSocket { fd })
    }
}

impl AsFd for SeqPacketListener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Connected sequenced-packet socket.
#[derive(Debug)]
pub struct SeqPacketSocket {
    fd: OwnedFd,
}

impl SeqPacketSocket {
    /// Connect to a listener bound at `path`.
    pub fn connect(path: impl AsRef<Path>) -> io::Result<Self> {
        let fd = seqpacket_socket()?;
        let addr = SocketAddrUnix::new(path.as_ref())?;
        retry(|| connect_unix(&fd, &addr))?;
        Ok(Self { fd })
    }

    /// Send `message` as one packet.
    ///
    /// A closed peer surfaces as `BrokenPipe` rather than a signal.
    pub fn send(&self, message: &[u8]) -> io::Result<()> {
        let sent = retry(|| send(&self.fd, message, SendFlags::NOSIGNAL))?;
        if sent != message.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short packet write: {sent} of {} bytes", message.len()),
            ));
        }
        Ok(())
    }

    /// Receive one packet into `buf`.
    ///
    /// Returns the packet's full length, which exceeds `buf.len()` if the
    /// packet was truncated. Zero means the peer closed the connection.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        retry(|| recv(&self.fd, buf, RecvFlags::TRUNC))
    }
}

impl AsFd for SeqPacketSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_boundaries_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        let listener = SeqPacketListener::bind(&path, 1).unwrap();

        let client = SeqPacketSocket::connect(&path).unwrap();
        let server = listener.accept().unwrap();

        client.send(b"one").unwrap();
        client.send(b"three").unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(server.recv(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"one");
        assert_eq!(server.recv(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"three");
    }

    #[test]
    fn truncation_reports_full_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        let listener = SeqPacketListener::bind(&path, 1).unwrap();

        let client = SeqPacketSocket::connect(&path).unwrap();
        let server = listener.accept().unwrap();

        client.send(&[7u8; 32]).unwrap();
        let mut small = [0u8; 8];
        assert_eq!(server.recv(&mut small).unwrap(), 32);
    }

    #[test]
    fn closed_peer_reads_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        let listener = SeqPacketListener::bind(&path, 1).unwrap();

        let client = SeqPacketSocket::connect(&path).unwrap();
        let server = listener.accept().unwrap();
        drop(client);

        let mut buf = [0u8; 8];
        assert_eq!(server.recv(&mut buf).unwrap(), 0);
        assert!(server.send(b"x").is_err());
    }
}
