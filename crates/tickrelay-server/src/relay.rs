//! Relay orchestrator.
//!
//! Bridges two fabrics through a two-phase tick barrier. One tick is:
//!
//! 1. [`Phase::AwaitBarrier`]: wait for every barrier subscriber to
//!    acknowledge the previous tick's begin-notice
//! 2. [`Phase::DrainDownstream`]: take exactly N messages from downstream,
//!    forwarding each to upstream for the same participant
//! 3. [`Phase::Maintenance`]: telemetry broadcast and subscriber accept
//! 4. [`Phase::DrainUpstream`]: take exactly N messages from upstream,
//!    forwarding each to downstream. The first one issues the new
//!    begin-notice; every one updates its participant's position
//!
//! A new begin-notice goes out the moment upstream starts producing a tick,
//! but downstream may not produce the following tick until every barrier
//! subscriber has acknowledged it.
//!
//! There is no timeout: a participant that never sends stalls the relay in
//! its drain phase indefinitely.

use std::io::Write;

use tickrelay_core::{PacketHandler, Transport, TransportError};
use tickrelay_proto::StateHeader;

use crate::{
    config::RelayConfig,
    error::RelayError,
    status::{Status, StatusWriter},
    sync::SyncServer,
};

/// Where the relay is within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for barrier acknowledgments of the previous begin-notice
    AwaitBarrier,
    /// Forwarding downstream-origin messages to upstream
    DrainDownstream,
    /// Telemetry broadcast and new-subscriber accept
    Maintenance,
    /// Forwarding upstream-origin messages to downstream
    DrainUpstream,
}

/// Forwards downstream-origin messages to upstream.
struct ToUpstream<'a> {
    upstream: &'a mut dyn Transport,
    forwarded: &'a mut usize,
    send_failed: bool,
}

impl PacketHandler for ToUpstream<'_> {
    fn on_packet(&mut self, participant: usize, payload: &[u8]) -> Result<(), TransportError> {
        self.upstream.send_packet(participant, payload).inspect_err(|_| self.send_failed = true)?;
        *self.forwarded += 1;
        Ok(())
    }
}

/// Forwards upstream-origin messages to downstream and feeds the sync
/// service.
struct ToDownstream<'a> {
    downstream: &'a mut dyn Transport,
    forwarded: &'a mut usize,
    sync: Option<&'a mut SyncServer>,
    last_timestamp: &'a mut f64,
    send_failed: bool,
}

impl PacketHandler for ToDownstream<'_> {
    fn on_packet(&mut self, participant: usize, payload: &[u8]) -> Result<(), TransportError> {
        self.downstream
            .send_packet(participant, payload)
            .inspect_err(|_| self.send_failed = true)?;

        let header = StateHeader::parse(payload);
        if let Some(header) = header {
            *self.last_timestamp = header.timestamp;
        }

        if let Some(sync) = self.sync.as_deref_mut() {
            if *self.forwarded == 0 {
                sync.begin_phase(*self.last_timestamp);
            }
            if let Some(header) = header {
                sync.set_position(participant as u32, header.position);
            }
        }

        *self.forwarded += 1;
        Ok(())
    }
}

/// The relay between an upstream and a downstream fabric.
pub struct Relay {
    upstream: Box<dyn Transport>,
    downstream: Box<dyn Transport>,
    sync: Option<SyncServer>,
    participants: usize,
    phase: Phase,
    forwarded: usize,
    last_timestamp: f64,
    ticks: u64,
}

impl Relay {
    /// Build a relay over two connected fabrics.
    ///
    /// # Errors
    ///
    /// `ParticipantMismatch` if the fabrics serve different participant
    /// counts.
    pub fn new(
        upstream: Box<dyn Transport>,
        downstream: Box<dyn Transport>,
        sync: Option<SyncServer>,
    ) -> Result<Self, RelayError> {
        let (up, down) = (upstream.participant_count(), downstream.participant_count());
        if up != down {
            return Err(RelayError::ParticipantMismatch { upstream: up, downstream: down });
        }

        Ok(Self {
            upstream,
            downstream,
            sync,
            participants: up,
            phase: Phase::AwaitBarrier,
            forwarded: 0,
            last_timestamp: 0.0,
            ticks: 0,
        })
    }

    /// Start the sync service, open both fabrics in the configured order and
    /// build the relay, emitting status lines along the way.
    pub fn start<W: Write>(
        config: &RelayConfig,
        status: &mut StatusWriter<W>,
    ) -> Result<Self, RelayError> {
        let sync = config.sync_port.map(SyncServer::listen).transpose()?;
        let names = &config.names;

        status.emit(Status::Starting).map_err(RelayError::Status)?;
        let (upstream, downstream) = if config.invert_order {
            let downstream = config
                .downstream
                .open(&names.downstream, status)
                .map_err(RelayError::downstream)?;
            status.emit(Status::Half).map_err(RelayError::Status)?;
            let upstream =
                config.upstream.open(&names.upstream, status).map_err(RelayError::upstream)?;
            (upstream, downstream)
        } else {
            let upstream =
                config.upstream.open(&names.upstream, status).map_err(RelayError::upstream)?;
            status.emit(Status::Half).map_err(RelayError::Status)?;
            let downstream = config
                .downstream
                .open(&names.downstream, status)
                .map_err(RelayError::downstream)?;
            (upstream, downstream)
        };
        status.emit(Status::Go).map_err(RelayError::Status)?;

        tracing::info!(
            participants = names.len(),
            upstream = %config.upstream,
            downstream = %config.downstream,
            sync = ?config.sync_port,
            "relay started"
        );
        Self::new(upstream, downstream, sync)
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Messages forwarded so far in the current half-tick.
    pub fn forwarded(&self) -> usize {
        self.forwarded
    }

    /// Completed ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Participants per fabric.
    pub fn participants(&self) -> usize {
        self.participants
    }

    /// The sync service, if enabled.
    pub fn sync(&self) -> Option<&SyncServer> {
        self.sync.as_ref()
    }

    /// Advance by one unit of work: one barrier wait, one forwarded message,
    /// or one maintenance pass.
    pub fn step(&mut self) -> Result<Phase, RelayError> {
        match self.phase {
            Phase::AwaitBarrier => {
                if let Some(sync) = self.sync.as_mut() {
                    sync.end_phase();
                }
                self.forwarded = 0;
                self.phase = Phase::DrainDownstream;
            },
            Phase::DrainDownstream => {
                let mut forward = ToUpstream {
                    upstream: self.upstream.as_mut(),
                    forwarded: &mut self.forwarded,
                    send_failed: false,
                };
                if let Err(e) = self.downstream.run_once(&mut forward) {
                    return Err(if forward.send_failed {
                        RelayError::upstream(e)
                    } else {
                        RelayError::downstream(e)
                    });
                }

                if self.forwarded == self.participants {
                    tracing::debug!(tick = self.ticks, "downstream half complete");
                    self.phase = Phase::Maintenance;
                }
            },
            Phase::Maintenance => {
                if let Some(sync) = self.sync.as_mut() {
                    sync.broadcast_and_maintain()?;
                }
                self.forwarded = 0;
                self.phase = Phase::DrainUpstream;
            },
            Phase::DrainUpstream => {
                let mut forward = ToDownstream {
                    downstream: self.downstream.as_mut(),
                    forwarded: &mut self.forwarded,
                    sync: self.sync.as_mut(),
                    last_timestamp: &mut self.last_timestamp,
                    send_failed: false,
                };
                if let Err(e) = self.upstream.run_once(&mut forward) {
                    return Err(if forward.send_failed {
                        RelayError::downstream(e)
                    } else {
                        RelayError::upstream(e)
                    });
                }

                if self.forwarded == self.participants {
                    let timestamp = self.last_timestamp;
                    tracing::debug!(tick = self.ticks, timestamp, "tick complete");
                    self.ticks += 1;
                    self.phase = Phase::AwaitBarrier;
                }
            },
        }

        Ok(self.phase)
    }

    /// Run one full tick, starting from the current phase and stopping when
    /// the upstream half completes.
    pub fn run_tick(&mut self) -> Result<(), RelayError> {
        let target = self.ticks + 1;
        while self.ticks < target {
            self.step()?;
        }
        Ok(())
    }

    /// Relay until a fatal error.
    pub fn run(&mut self) -> Result<(), RelayError> {
        loop {
            self.run_tick()?;
        }
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("participants", &self.participants)
            .field("phase", &self.phase)
            .field("forwarded", &self.forwarded)
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}
