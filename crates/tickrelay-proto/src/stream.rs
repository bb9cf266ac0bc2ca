//! Stream-transport handshake and framing.
//!
//! The connecting side opens with a [`Handshake`] listing the participant names
//! it serves; the listening side uses it to map the connection's local indices
//! onto global participant indices. Afterwards every message travels as
//! `[FrameHeader][payload]`.
//!
//! ```text
//! handshake:  u16 count, count × (u16 name_len, name bytes)
//! frame:      u16 local_index, u16 payload_len, payload bytes
//! ```
//!
//! All integers are big-endian.

use std::io::Read;

use bytes::{Buf, BufMut};

use crate::errors::{ProtocolError, Result};

/// Participant list sent by the connecting side of a stream transport.
///
/// Names are listed in local-index order: the first name is local index 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Participant names served by the connection
    pub names: Vec<String>,
}

impl Handshake {
    /// Create a handshake for the given names.
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { names: names.into_iter().map(Into::into).collect() }
    }

    /// Number of bytes [`Handshake::encode`] writes.
    pub fn encoded_len(&self) -> usize {
        2 + self.names.iter().map(|n| 2 + n.len()).sum::<usize>()
    }

    /// Encode into `dst`.
    ///
    /// # Errors
    ///
    /// - `TooManyParticipants` if there are more than `u16::MAX` names
    /// - `PayloadTooLarge` if a name is longer than `u16::MAX` bytes
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let count = u16::try_from(self.names.len())
            .map_err(|_| ProtocolError::TooManyParticipants(self.names.len()))?;
        dst.put_u16(count);

        for name in &self.names {
            let len = u16::try_from(name.len()).map_err(|_| ProtocolError::PayloadTooLarge {
                size: name.len(),
                max: u16::MAX as usize,
            })?;
            dst.put_u16(len);
            dst.put_slice(name.as_bytes());
        }

        Ok(())
    }

    /// Decode from a complete buffer.
    ///
    /// Returns the handshake and the number of bytes consumed.
    pub fn decode(mut src: &[u8]) -> Result<(Self, usize)> {
        let total = src.len();
        let count = take_u16(&mut src, total)?;

        let mut names = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = take_u16(&mut src, total)? as usize;
            if src.len() < len {
                return Err(ProtocolError::Truncated {
                    expected: total - src.len() + len,
                    actual: total,
                });
            }
            let name =
                std::str::from_utf8(&src[..len]).map_err(|_| ProtocolError::InvalidName)?;
            names.push(name.to_owned());
            src.advance(len);
        }

        Ok((Self { names }, total - src.len()))
    }

    /// Read a handshake from a blocking stream.
    pub fn read_from(reader: &mut impl Read) -> Result<Self> {
        let count = read_u16(reader)?;

        let mut names = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = read_u16(reader)? as usize;
            let mut raw = vec![0u8; len];
            reader.read_exact(&mut raw)?;
            names.push(String::from_utf8(raw).map_err(|_| ProtocolError::InvalidName)?);
        }

        Ok(Self { names })
    }
}

/// Header preceding every payload on an established stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Participant index local to the connection
    pub local_index: u16,
    /// Number of payload bytes that follow
    pub payload_len: u16,
}

impl FrameHeader {
    /// Serialized size in bytes.
    pub const SIZE: usize = 4;

    /// Largest payload a single frame can carry.
    pub const MAX_PAYLOAD: usize = u16::MAX as usize;

    /// Build a header for a payload of `len` bytes.
    ///
    /// # Errors
    ///
    /// `PayloadTooLarge` if `len` exceeds [`FrameHeader::MAX_PAYLOAD`].
    pub fn for_payload(local_index: u16, len: usize) -> Result<Self> {
        let payload_len = u16::try_from(len)
            .map_err(|_| ProtocolError::PayloadTooLarge { size: len, max: Self::MAX_PAYLOAD })?;
        Ok(Self { local_index, payload_len })
    }

    /// Serialize to network byte order.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..2].copy_from_slice(&self.local_index.to_be_bytes());
        out[2..4].copy_from_slice(&self.payload_len.to_be_bytes());
        out
    }

    /// Parse from network byte order.
    #[must_use]
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            local_index: u16::from_be_bytes([bytes[0], bytes[1]]),
            payload_len: u16::from_be_bytes([bytes[2], bytes[3]]),
        }
    }

    /// Append header and payload to `dst`.
    pub fn encode_frame(local_index: u16, payload: &[u8], dst: &mut impl BufMut) -> Result<()> {
        let header = Self::for_payload(local_index, payload.len())?;
        dst.put_slice(&header.to_bytes());
        dst.put_slice(payload);
        Ok(())
    }

    /// Read a header from a blocking stream.
    pub fn read_from(reader: &mut impl Read) -> Result<Self> {
        let mut raw = [0u8; Self::SIZE];
        reader.read_exact(&mut raw)?;
        Ok(Self::from_bytes(raw))
    }
}

fn take_u16(src: &mut &[u8], total: usize) -> Result<u16> {
    if src.len() < 2 {
        return Err(ProtocolError::Truncated { expected: total - src.len() + 2, actual: total });
    }
    Ok(src.get_u16())
}

fn read_u16(reader: &mut impl Read) -> Result<u16> {
    let mut raw = [0u8; 2];
    reader.read_exact(&mut raw)?;
    Ok(u16::from_be_bytes(raw))
}
