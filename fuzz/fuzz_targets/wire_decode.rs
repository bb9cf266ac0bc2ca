//! Fuzz target for every tickrelay decoder
//!
//! Feeds the same arbitrary bytes to each buffer decoder and each blocking
//! reader. Peers on every channel are untrusted, so none of them may panic
//! or allocate according to a claimed length before the bytes arrive.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tickrelay_proto::{
    CompanionMessage, FrameHeader, Handshake, Snapshot, StateHeader, SubscriptionKind,
    companion::{read_identity, read_message},
    sync::read_begin_notice,
};

fuzz_target!(|data: &[u8]| {
    let _ = Handshake::decode(data);
    let _ = Snapshot::decode(data);
    let _ = CompanionMessage::parse(data);
    let _ = StateHeader::parse(data);
    if let Some(&byte) = data.first() {
        let _ = SubscriptionKind::try_from(byte);
    }

    let _ = Handshake::read_from(&mut &data[..]);
    let _ = Snapshot::read_from(&mut &data[..]);
    let _ = FrameHeader::read_from(&mut &data[..]);
    let _ = read_begin_notice(&mut &data[..]);
    let _ = read_identity(&mut &data[..]);
    let _ = read_message(&mut &data[..]);
});
