//! Property-based tests for the wire codecs.
//!
//! Every message type must decode to exactly what was encoded, whether it is
//! parsed from a complete buffer or read incrementally from a stream, and
//! truncated input must be rejected rather than misparsed.

use proptest::prelude::*;
use tickrelay_proto::{
    CompanionMessage, Destination, FrameHeader, Handshake, Position, ProtocolError, Snapshot,
    companion,
};

fn arbitrary_name() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,24}"
}

fn arbitrary_position() -> impl Strategy<Value = Position> {
    (-1.0e6f64..1.0e6, -1.0e6f64..1.0e6, -1.0e6f64..1.0e6)
        .prop_map(|(x, y, z)| Position::new(x, y, z))
}

fn arbitrary_snapshot() -> impl Strategy<Value = Snapshot> {
    (0.0f64..1.0e5, prop::collection::vec((any::<u32>(), arbitrary_position()), 0..32))
        .prop_map(|(timestamp, positions)| Snapshot { timestamp, positions })
}

proptest! {
    #[test]
    fn prop_handshake_stream_and_buffer_agree(names in prop::collection::vec(arbitrary_name(), 0..16)) {
        let handshake = Handshake::new(names);
        let mut buf = Vec::new();
        handshake.encode(&mut buf).unwrap();
        prop_assert_eq!(buf.len(), handshake.encoded_len());

        let (decoded, used) = Handshake::decode(&buf).unwrap();
        prop_assert_eq!(used, buf.len());
        prop_assert_eq!(&decoded, &handshake);

        let streamed = Handshake::read_from(&mut &buf[..]).unwrap();
        prop_assert_eq!(streamed, handshake);
    }

    #[test]
    fn prop_truncated_handshake_rejected(
        names in prop::collection::vec(arbitrary_name(), 1..8),
        cut in any::<prop::sample::Index>(),
    ) {
        let mut buf = Vec::new();
        Handshake::new(names).encode(&mut buf).unwrap();
        let cut = cut.index(buf.len());

        let is_truncated = matches!(Handshake::decode(&buf[..cut]), Err(ProtocolError::Truncated { .. }));
        prop_assert!(is_truncated);
    }

    #[test]
    fn prop_frame_header_preserves_fields(index in any::<u16>(), payload in prop::collection::vec(any::<u8>(), 0..2048)) {
        let mut buf = Vec::new();
        FrameHeader::encode_frame(index, &payload, &mut buf).unwrap();

        let mut reader = &buf[..];
        let header = FrameHeader::read_from(&mut reader).unwrap();
        prop_assert_eq!(header.local_index, index);
        prop_assert_eq!(header.payload_len as usize, payload.len());
        prop_assert_eq!(reader, &payload[..]);
    }

    #[test]
    fn prop_snapshot_decode_matches_stream_read(snapshot in arbitrary_snapshot()) {
        let mut buf = Vec::new();
        snapshot.encode(&mut buf).unwrap();

        let decoded = Snapshot::decode(&buf).unwrap();
        let streamed = Snapshot::read_from(&mut &buf[..]).unwrap();
        prop_assert_eq!(&decoded, &snapshot);
        prop_assert_eq!(streamed, snapshot);
    }

    #[test]
    fn prop_companion_message_preserves_peer(marker in any::<i32>(), body in prop::collection::vec(any::<u8>(), 0..512)) {
        let msg = CompanionMessage::new(Destination::from_marker(marker), body.clone());

        let mut framed = Vec::new();
        companion::encode_message(&msg.to_payload(), &mut framed).unwrap();
        let payload = companion::read_message(&mut &framed[..]).unwrap();
        let parsed = CompanionMessage::parse(&payload).unwrap();

        prop_assert_eq!(&parsed.body[..], &body[..]);
        prop_assert_eq!(parsed.peer == Destination::Broadcast, marker < 0);
    }
}
