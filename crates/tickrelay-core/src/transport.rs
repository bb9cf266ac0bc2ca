//! Transport abstraction.
//!
//! A transport serves a fixed, ordered set of participants. Every inbound
//! message is attributed to a participant's global index and delivered with
//! its boundaries intact, whatever the underlying channel does with bytes.

use std::os::fd::AsFd;

use bytes::Bytes;

use crate::error::TransportError;

/// Receiver of inbound packets.
///
/// Called once per message, synchronously, from inside
/// [`Transport::run_once`]. An error aborts the step and is returned to the
/// caller of `run_once`.
pub trait PacketHandler {
    /// Handle one message from `participant` (global index).
    fn on_packet(&mut self, participant: usize, payload: &[u8]) -> Result<(), TransportError>;
}

impl<F> PacketHandler for F
where
    F: FnMut(usize, &[u8]) -> Result<(), TransportError>,
{
    fn on_packet(&mut self, participant: usize, payload: &[u8]) -> Result<(), TransportError> {
        self(participant, payload)
    }
}

/// An owned inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Global participant index the message is attributed to
    pub participant: usize,
    /// Message bytes, boundaries preserved
    pub payload: Bytes,
}

/// Uniform send/receive interface over a fixed participant set.
///
/// The descriptor exposed through [`AsFd`] turns readable whenever a call to
/// [`run_once`](Self::run_once) would make progress, so transports can be
/// watched from an enclosing [`PollGroup`](crate::PollGroup).
///
/// # Invariants
///
/// - At most one inbound message is consumed per `run_once` call. Callers
///   invoke it exactly as many times as they expect messages.
/// - Participant indices are in `0..participant_count()`.
pub trait Transport: AsFd {
    /// Number of participants this transport serves.
    fn participant_count(&self) -> usize;

    /// Send one message to `participant` (global index).
    fn send_packet(&mut self, participant: usize, payload: &[u8]) -> Result<(), TransportError>;

    /// Block until one inbound message is available and hand it to `handler`.
    fn run_once(&mut self, handler: &mut dyn PacketHandler) -> Result<(), TransportError>;

    /// Block until one inbound message is available and return it.
    fn recv_packet(&mut self) -> Result<Packet, TransportError> {
        let mut capture = Capture::default();
        loop {
            self.run_once(&mut capture)?;
            if let Some(packet) = capture.packet.take() {
                return Ok(packet);
            }
        }
    }
}

#[derive(Default)]
struct Capture {
    packet: Option<Packet>,
}

impl PacketHandler for Capture {
    fn on_packet(&mut self, participant: usize, payload: &[u8]) -> Result<(), TransportError> {
        self.packet = Some(Packet { participant, payload: Bytes::copy_from_slice(payload) });
        Ok(())
    }
}
