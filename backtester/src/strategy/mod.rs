pub mod crossover;

pub use crossover::MovingAverageCrossover;

use common::{BacktestError, Event, EventKind, Result, SignalEvent};

use crate::data::BarSource;

/// Turns market events into trading signals.
///
/// Implementations read only what the bar source has revealed. Any state
/// they keep between ticks lives in the instance, which is rebuilt for
/// every parameter variant.
pub trait Strategy {
    fn calculate_signals(
        &mut self,
        event: &Event,
        bars: &dyn BarSource,
    ) -> Result<Vec<SignalEvent>>;
}

/// Reject anything that is not a market event
pub(crate) fn expect_market(event: &Event) -> Result<()> {
    match event {
        Event::Market(_) => Ok(()),
        other => Err(BacktestError::InvalidEvent {
            expected: EventKind::Market,
            actual: other.kind(),
        }),
    }
}
