//! Engine-facing interface.

use std::time::Duration;

use bytes::Bytes;
use tickrelay_proto::{Destination, Position};

/// Hooks into the simulation engine hosting the driver.
pub trait Engine {
    /// Move entity `id` to `position` immediately.
    fn set_position(&mut self, id: u32, position: Position);

    /// Deliver `body`, sent by entity `source`, to `destination` after
    /// `delay` of simulated time.
    fn schedule_delivery(
        &mut self,
        delay: Duration,
        source: u32,
        destination: Destination,
        body: Bytes,
    );
}

/// Outcome of waiting for the next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickEvent {
    /// The relay announced a tick; advance the engine clock to `timestamp`
    /// seconds, then call `end_tick`
    Begin {
        /// Simulated time of the tick, in seconds
        timestamp: f64,
    },
    /// The relay or a companion closed its connection; the session is over
    Closed,
}

impl TickEvent {
    /// Tick timestamp as a [`Duration`], for engines with integer clocks.
    ///
    /// `None` for [`TickEvent::Closed`] and for timestamps that are negative,
    /// non-finite or out of range.
    pub fn as_duration(&self) -> Option<Duration> {
        match *self {
            Self::Begin { timestamp } => Duration::try_from_secs_f64(timestamp).ok(),
            Self::Closed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_accessor() {
        let tick = TickEvent::Begin { timestamp: 1.5 };
        assert_eq!(tick.as_duration(), Some(Duration::from_millis(1500)));
        assert_eq!(TickEvent::Begin { timestamp: -1.0 }.as_duration(), None);
        assert_eq!(TickEvent::Begin { timestamp: f64::NAN }.as_duration(), None);
        assert_eq!(TickEvent::Closed.as_duration(), None);
    }
}
