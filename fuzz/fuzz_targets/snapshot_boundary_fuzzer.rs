//! Fuzz target for telemetry snapshot length handling
//!
//! # Strategy
//!
//! - Claimed record count: zero, exact, one over, one under, `u32::MAX`
//! - Record bytes: arbitrary, possibly fewer than claimed
//!
//! # Invariants
//!
//! - Decoding succeeds only when every claimed record is present
//! - A huge claimed count is rejected without allocating for it
//! - The buffer decoder and the stream reader agree
//! - A decoded snapshot re-encodes to the bytes it was read from

#![no_main]

use arbitrary::Arbitrary;
use bytes::BufMut;
use libfuzzer_sys::fuzz_target;
use tickrelay_proto::Snapshot;

#[derive(Debug, Arbitrary)]
enum ClaimedCount {
    Zero,
    Exact,
    OneOver,
    OneUnder,
    Max,
    Random(u32),
}

#[derive(Debug, Arbitrary)]
struct Input {
    timestamp: f64,
    count: ClaimedCount,
    records: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let available = (input.records.len() / Snapshot::RECORD_SIZE) as u32;
    let claimed = match input.count {
        ClaimedCount::Zero => 0,
        ClaimedCount::Exact => available,
        ClaimedCount::OneOver => available.saturating_add(1),
        ClaimedCount::OneUnder => available.saturating_sub(1),
        ClaimedCount::Max => u32::MAX,
        ClaimedCount::Random(n) => n,
    };

    let mut wire = Vec::new();
    wire.put_f64_le(input.timestamp);
    wire.put_u32_le(claimed);
    wire.extend_from_slice(&input.records);

    let decoded = Snapshot::decode(&wire);
    let streamed = Snapshot::read_from(&mut &wire[..]);
    assert_eq!(decoded.is_ok(), claimed <= available);
    assert_eq!(decoded.is_ok(), streamed.is_ok());

    if let Ok(snapshot) = decoded {
        assert_eq!(snapshot.positions.len(), claimed as usize);

        let mut again = Vec::new();
        snapshot.encode(&mut again).unwrap();
        // Timestamp bits are compared by decode; records must match exactly.
        let used = Snapshot::PREFIX_SIZE + claimed as usize * Snapshot::RECORD_SIZE;
        assert_eq!(&again[8..], &wire[8..used]);
    }
});
