//! Fuzz target for the stream-transport framing
//!
//! # Strategy
//!
//! - Encode an arbitrary sequence of `(local_index, payload)` frames into one
//!   batch, the way a coalesced send does
//! - Optionally cut the batch short to model a peer closing mid-frame
//!
//! # Invariants
//!
//! - Payloads over `FrameHeader::MAX_PAYLOAD` are rejected on encode
//! - Every complete frame reads back with its index and bytes intact
//! - A cut batch yields exactly the frames before the cut, then an error

#![no_main]

use std::io::Read;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tickrelay_proto::FrameHeader;

#[derive(Debug, Arbitrary)]
struct Batch {
    frames: Vec<(u16, Vec<u8>)>,
    oversized: Option<u16>,
    cut: Option<u16>,
}

fuzz_target!(|batch: Batch| {
    let mut wire = Vec::new();
    let mut boundaries = Vec::new();
    for (index, payload) in &batch.frames {
        FrameHeader::encode_frame(*index, payload, &mut wire).unwrap();
        boundaries.push(wire.len());
    }

    if let Some(extra) = batch.oversized {
        let payload = vec![0u8; FrameHeader::MAX_PAYLOAD + 1 + usize::from(extra % 64)];
        assert!(FrameHeader::encode_frame(0, &payload, &mut Vec::new()).is_err());
    }

    let end = match batch.cut {
        Some(cut) if !wire.is_empty() => usize::from(cut) % wire.len(),
        _ => wire.len(),
    };
    let complete = boundaries.iter().filter(|&&b| b <= end).count();

    let mut reader = &wire[..end];
    for (index, payload) in batch.frames.iter().take(complete) {
        let header = FrameHeader::read_from(&mut reader).unwrap();
        assert_eq!(header.local_index, *index);

        let mut got = vec![0u8; usize::from(header.payload_len)];
        reader.read_exact(&mut got).unwrap();
        assert_eq!(&got, payload);
    }

    if complete < batch.frames.len() {
        let short = FrameHeader::read_from(&mut reader).and_then(|header| {
            let mut got = vec![0u8; usize::from(header.payload_len)];
            reader.read_exact(&mut got)?;
            Ok(())
        });
        assert!(short.is_err());
    }
});
