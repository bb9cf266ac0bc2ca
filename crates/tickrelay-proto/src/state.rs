//! Leading fields of a relayed state packet.
//!
//! The relay forwards physics-engine packets opaquely. It only peeks at the
//! first 32 bytes, which every vehicle state packet starts with:
//!
//! ```text
//! f64 timestamp, f64 x, f64 y, f64 z, ...engine specific fields
//! ```
//!
//! All fields are little-endian.

use bytes::{Buf, BufMut};

/// A point in simulated space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
}

impl Position {
    /// Create a position.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Timestamp and position at the head of a state packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateHeader {
    /// Simulated time in seconds
    pub timestamp: f64,
    /// Vehicle position
    pub position: Position,
}

impl StateHeader {
    /// Bytes inspected at the start of a packet.
    pub const SIZE: usize = 32;

    /// Parse the leading fields of `payload`.
    ///
    /// Returns `None` if the payload is shorter than [`StateHeader::SIZE`];
    /// such packets are still relayed, just not inspected.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::SIZE {
            return None;
        }

        let mut src = &payload[..Self::SIZE];
        let timestamp = src.get_f64_le();
        let position = Position::new(src.get_f64_le(), src.get_f64_le(), src.get_f64_le());
        Some(Self { timestamp, position })
    }

    /// Write the header fields into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_f64_le(self.timestamp);
        dst.put_f64_le(self.position.x);
        dst.put_f64_le(self.position.y);
        dst.put_f64_le(self.position.z);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ignores_trailing_engine_fields() {
        let header = StateHeader { timestamp: 4.0, position: Position::new(1.0, 2.0, 3.0) };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        buf.extend_from_slice(&[0xaa; 64]);

        assert_eq!(StateHeader::parse(&buf), Some(header));
    }

    #[test]
    fn short_payload_is_not_inspected() {
        assert_eq!(StateHeader::parse(&[0u8; 31]), None);
        assert_eq!(StateHeader::parse(&[]), None);
    }
}
