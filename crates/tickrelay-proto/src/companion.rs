//! Lockstep driver companion channel.
//!
//! Each simulated entity inside an engine process has a remote companion
//! process (for example the flight controller of that vehicle). The companion
//! connects, identifies itself with a 4-byte entity id, and from then on both
//! sides exchange length-prefixed messages, each acknowledged with a single
//! [`ACK`](crate::ACK) byte:
//!
//! ```text
//! identity:  u32 entity_id
//! message:   u32 length, length × u8 payload
//! payload:   i32 peer (negative = broadcast), body bytes
//! ```
//!
//! All integers are little-endian.

use std::io::{self, Read};

use bytes::{BufMut, Bytes};

use crate::errors::{ProtocolError, Result};

/// Where a companion message is headed, or where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Every entity in the engine
    Broadcast,
    /// One entity
    Entity(u32),
}

impl Destination {
    /// Decode the signed wire marker.
    #[must_use]
    pub fn from_marker(marker: i32) -> Self {
        match u32::try_from(marker) {
            Ok(id) => Self::Entity(id),
            Err(_) => Self::Broadcast,
        }
    }

    /// Signed wire marker; `-1` for broadcast.
    #[must_use]
    pub fn to_marker(self) -> i32 {
        match self {
            Self::Broadcast => -1,
            Self::Entity(id) => id as i32,
        }
    }
}

/// A companion payload split into its addressing field and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionMessage {
    /// Destination (outbound from a companion) or source (inbound to one)
    pub peer: Destination,
    /// Application bytes after the addressing field
    pub body: Bytes,
}

impl CompanionMessage {
    /// Size of the addressing field.
    pub const PEER_SIZE: usize = 4;

    /// Create a message.
    pub fn new(peer: Destination, body: impl Into<Bytes>) -> Self {
        Self { peer, body: body.into() }
    }

    /// Split a raw payload into addressing field and body.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::PEER_SIZE {
            return Err(ProtocolError::Truncated {
                expected: Self::PEER_SIZE,
                actual: payload.len(),
            });
        }
        let marker = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        Ok(Self {
            peer: Destination::from_marker(marker),
            body: Bytes::copy_from_slice(&payload[Self::PEER_SIZE..]),
        })
    }

    /// Raw payload: addressing field followed by body.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::PEER_SIZE + self.body.len());
        out.put_i32_le(self.peer.to_marker());
        out.put_slice(&self.body);
        out
    }
}

/// Encode the identity handshake a companion sends on connect.
#[must_use]
pub fn encode_identity(entity_id: u32) -> [u8; 4] {
    entity_id.to_le_bytes()
}

/// Read the identity handshake.
pub fn read_identity(reader: &mut impl Read) -> Result<u32> {
    let mut raw = [0u8; 4];
    reader.read_exact(&mut raw)?;
    Ok(u32::from_le_bytes(raw))
}

/// Append a length-prefixed message to `dst`.
///
/// # Errors
///
/// `PayloadTooLarge` if the payload length does not fit in a `u32`.
pub fn encode_message(payload: &[u8], dst: &mut impl BufMut) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.put_u32_le(len);
    dst.put_slice(payload);
    Ok(())
}

/// Initial buffer for a message body. Larger bodies grow as bytes arrive.
const INITIAL_BODY_CAPACITY: usize = 4096;

/// Read a length-prefixed message from a blocking stream.
///
/// The claimed length is untrusted: the body buffer only grows as bytes
/// arrive, and a stream that ends early yields `UnexpectedEof`.
pub fn read_message(reader: &mut impl Read) -> Result<Vec<u8>> {
    let mut raw = [0u8; 4];
    reader.read_exact(&mut raw)?;
    let len = u32::from_le_bytes(raw);

    let mut payload = Vec::with_capacity((len as usize).min(INITIAL_BODY_CAPACITY));
    let read = reader.take(u64::from(len)).read_to_end(&mut payload)?;
    if read < len as usize {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(payload)
}
