//! Sync-service channel formats.
//!
//! An observer connects over TCP and sends one [`SubscriptionKind`] byte. From
//! then on:
//!
//! - Barrier subscribers receive an 8-byte `f64` begin-notice per tick and
//!   answer with one byte (any value) once they are done with the tick.
//! - Telemetry subscribers receive a [`Snapshot`] per tick and answer with one
//!   byte (any value).
//!
//! ```text
//! begin-notice:  f64 timestamp
//! snapshot:      f64 timestamp, u32 count, count × (u32 id, f64 x, f64 y, f64 z)
//! ```
//!
//! All fields are little-endian.

use std::io::Read;

use bytes::{Buf, BufMut};

use crate::{
    errors::{ProtocolError, Result},
    state::Position,
};

/// Which subscriber set an incoming sync connection joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// Hard barrier: the relay waits for this subscriber every tick
    Barrier,
    /// Best-effort telemetry snapshots
    Telemetry,
}

impl SubscriptionKind {
    /// Wire value of this kind.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Barrier => 0,
            Self::Telemetry => 1,
        }
    }
}

impl TryFrom<u8> for SubscriptionKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Barrier),
            1 => Ok(Self::Telemetry),
            other => Err(ProtocolError::InvalidSubscription(other)),
        }
    }
}

/// Encode a barrier begin-notice.
#[must_use]
pub fn encode_begin_notice(timestamp: f64) -> [u8; 8] {
    timestamp.to_le_bytes()
}

/// Read a barrier begin-notice from a blocking stream.
pub fn read_begin_notice(reader: &mut impl Read) -> Result<f64> {
    let mut raw = [0u8; 8];
    reader.read_exact(&mut raw)?;
    Ok(f64::from_le_bytes(raw))
}

/// Per-tick telemetry packet: simulated time plus the last known position of
/// every participant that has reported one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    /// Simulated time of the tick, in seconds
    pub timestamp: f64,
    /// `(participant id, position)` records
    pub positions: Vec<(u32, Position)>,
}

impl Snapshot {
    /// Size of the fixed prefix (timestamp + record count).
    pub const PREFIX_SIZE: usize = 12;

    /// Size of one position record.
    pub const RECORD_SIZE: usize = 28;

    /// Number of bytes [`Snapshot::encode`] writes.
    pub fn encoded_len(&self) -> usize {
        Self::PREFIX_SIZE + Self::RECORD_SIZE * self.positions.len()
    }

    /// Encode into `dst`.
    ///
    /// # Errors
    ///
    /// `TooManyParticipants` if the record count does not fit in a `u32`.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let count = u32::try_from(self.positions.len())
            .map_err(|_| ProtocolError::TooManyParticipants(self.positions.len()))?;

        dst.put_f64_le(self.timestamp);
        dst.put_u32_le(count);
        for (id, pos) in &self.positions {
            dst.put_u32_le(*id);
            dst.put_f64_le(pos.x);
            dst.put_f64_le(pos.y);
            dst.put_f64_le(pos.z);
        }

        Ok(())
    }

    /// Decode from a complete buffer.
    pub fn decode(mut src: &[u8]) -> Result<Self> {
        let total = src.len();
        if total < Self::PREFIX_SIZE {
            return Err(ProtocolError::Truncated { expected: Self::PREFIX_SIZE, actual: total });
        }

        let timestamp = src.get_f64_le();
        let count = src.get_u32_le() as usize;

        let expected = Self::PREFIX_SIZE + count * Self::RECORD_SIZE;
        if total < expected {
            return Err(ProtocolError::Truncated { expected, actual: total });
        }

        let positions = (0..count)
            .map(|_| {
                let id = src.get_u32_le();
                let pos = Position::new(src.get_f64_le(), src.get_f64_le(), src.get_f64_le());
                (id, pos)
            })
            .collect();

        Ok(Self { timestamp, positions })
    }

    /// Read a snapshot from a blocking stream.
    pub fn read_from(reader: &mut impl Read) -> Result<Self> {
        let mut prefix = [0u8; Self::PREFIX_SIZE];
        reader.read_exact(&mut prefix)?;
        let timestamp = f64::from_le_bytes([
            prefix[0], prefix[1], prefix[2], prefix[3], prefix[4], prefix[5], prefix[6], prefix[7],
        ]);
        let count = u32::from_le_bytes([prefix[8], prefix[9], prefix[10], prefix[11]]) as usize;

        // The count is untrusted until the records actually arrive.
        let mut positions = Vec::with_capacity(count.min(1024));
        let mut record = [0u8; Self::RECORD_SIZE];
        for _ in 0..count {
            reader.read_exact(&mut record)?;
            let mut cursor = &record[..];
            let id = cursor.get_u32_le();
            let (x, y, z) = (cursor.get_f64_le(), cursor.get_f64_le(), cursor.get_f64_le());
            positions.push((id, Position::new(x, y, z)));
        }

        Ok(Self { timestamp, positions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_byte_values() {
        assert_eq!(SubscriptionKind::try_from(0).unwrap(), SubscriptionKind::Barrier);
        assert_eq!(SubscriptionKind::try_from(1).unwrap(), SubscriptionKind::Telemetry);
        assert!(matches!(
            SubscriptionKind::try_from(7),
            Err(ProtocolError::InvalidSubscription(7))
        ));
    }

    #[test]
    fn begin_notice_is_little_endian_double() {
        assert_eq!(encode_begin_notice(1.5), [0, 0, 0, 0, 0, 0, 0xf8, 0x3f]);
    }

    #[test]
    fn snapshot_layout() {
        let snapshot =
            Snapshot { timestamp: 2.0, positions: vec![(3, Position::new(1.0, 0.0, -1.0))] };
        let mut buf = Vec::new();
        snapshot.encode(&mut buf).unwrap();

        assert_eq!(buf.len(), snapshot.encoded_len());
        assert_eq!(&buf[0..8], &2.0f64.to_le_bytes());
        assert_eq!(&buf[8..12], &1u32.to_le_bytes());
        assert_eq!(&buf[12..16], &3u32.to_le_bytes());
        assert_eq!(&buf[32..40], &(-1.0f64).to_le_bytes());
    }

    #[test]
    fn empty_snapshot_is_prefix_only() {
        let mut buf = Vec::new();
        Snapshot { timestamp: 0.25, positions: vec![] }.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), Snapshot::PREFIX_SIZE);

        let decoded = Snapshot::read_from(&mut &buf[..]).unwrap();
        assert!(decoded.positions.is_empty());
        assert!((decoded.timestamp - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_rejects_missing_records() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1.0f64.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; Snapshot::RECORD_SIZE]);

        let err = Snapshot::decode(&buf).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { expected: 68, actual: 40 }));
    }
}
