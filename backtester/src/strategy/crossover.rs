use std::collections::HashMap;

use common::{BarField, Direction, Event, Result, SignalEvent, StrategyParams};

use super::{expect_market, Strategy};
use crate::data::BarSource;
use crate::indicators::trailing_sma;

/// Long-only moving average crossover.
///
/// Goes LONG when the short SMA crosses above the long SMA and EXITs when
/// it falls back below. Windows come from the `short_window` and
/// `long_window` parameters (defaults 100/400).
pub struct MovingAverageCrossover {
    symbols: Vec<String>,
    short_window: usize,
    long_window: usize,
    field: BarField,
    invested: HashMap<String, bool>,
}

impl MovingAverageCrossover {
    pub const STRATEGY_ID: u32 = 1;

    pub fn new(symbols: &[String], short_window: usize, long_window: usize, field: BarField) -> Self {
        Self {
            symbols: symbols.to_vec(),
            short_window,
            long_window,
            field,
            invested: symbols.iter().map(|s| (s.clone(), false)).collect(),
        }
    }

    /// Build from sweep parameters
    pub fn from_params(symbols: &[String], params: &StrategyParams, field: BarField) -> Result<Self> {
        let short_window = params.window_or("short_window", 100)?;
        let long_window = params.window_or("long_window", 400)?;
        if short_window >= long_window {
            return Err(common::BacktestError::InvalidParameter(format!(
                "short_window ({}) must be less than long_window ({})",
                short_window, long_window
            )));
        }
        Ok(Self::new(symbols, short_window, long_window, field))
    }

    pub fn is_invested(&self, symbol: &str) -> bool {
        self.invested.get(symbol).copied().unwrap_or(false)
    }
}

impl Strategy for MovingAverageCrossover {
    fn calculate_signals(
        &mut self,
        event: &Event,
        bars: &dyn BarSource,
    ) -> Result<Vec<SignalEvent>> {
        expect_market(event)?;

        let mut signals = Vec::new();
        for symbol in &self.symbols {
            let values = bars.latest_bars_values(symbol, self.field, self.long_window)?;
            // Wait for a full long window
            let (Some(short_sma), Some(long_sma)) = (
                trailing_sma(&values, self.short_window),
                trailing_sma(&values, self.long_window),
            ) else {
                continue;
            };

            let timestamp = bars.latest_bar_datetime(symbol)?;
            let invested = self.invested.entry(symbol.clone()).or_insert(false);

            if short_sma > long_sma && !*invested {
                signals.push(SignalEvent::new(
                    Self::STRATEGY_ID,
                    symbol.clone(),
                    timestamp,
                    Direction::Long,
                    1.0,
                ));
                *invested = true;
            } else if short_sma < long_sma && *invested {
                signals.push(SignalEvent::new(
                    Self::STRATEGY_ID,
                    symbol.clone(),
                    timestamp,
                    Direction::Exit,
                    1.0,
                ));
                *invested = false;
            }
        }

        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{generate_bars_with_pattern, HistoricBarSource};
    use crate::queue::EventQueue;
    use common::{BacktestError, MarketEvent, OrderEvent, OrderSide};

    fn replay(bars: Vec<common::Bar>, short: usize, long: usize) -> Vec<(usize, SignalEvent)> {
        let symbols = vec!["SPY".to_string()];
        let mut src = HistoricBarSource::new(vec![("SPY".to_string(), bars)]).unwrap();
        let mut strategy = MovingAverageCrossover::new(&symbols, short, long, BarField::AdjClose);
        let mut events = EventQueue::new();
        let mut out = Vec::new();

        let mut tick = 0;
        loop {
            src.advance(&mut events);
            if !src.continue_backtest() {
                break;
            }
            while let Some(event) = events.try_dequeue() {
                for signal in strategy.calculate_signals(&event, &src).unwrap() {
                    out.push((tick, signal));
                }
            }
            tick += 1;
        }
        out
    }

    #[test]
    fn test_long_then_exit() {
        // Flat, rally on days 10-12, sell-off on days 20-24
        let bars = generate_bars_with_pattern(40, 100.0, &[20, 21, 22, 23, 24], &[10, 11, 12]);
        let signals = replay(bars, 2, 5);

        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].0, 10);
        assert_eq!(signals[0].1.direction, Direction::Long);
        assert_eq!(signals[1].1.direction, Direction::Exit);
        assert!(signals[1].0 >= 20);
    }

    #[test]
    fn test_no_signal_before_full_window() {
        let bars = generate_bars_with_pattern(10, 100.0, &[], &[1, 2, 3]);
        let signals = replay(bars, 2, 20);
        assert!(signals.is_empty());
    }

    #[test]
    fn test_rejects_non_market_event() {
        let symbols = vec!["SPY".to_string()];
        let src = HistoricBarSource::new(vec![(
            "SPY".to_string(),
            generate_bars_with_pattern(5, 100.0, &[], &[]),
        )])
        .unwrap();
        let mut strategy = MovingAverageCrossover::new(&symbols, 2, 3, BarField::Close);

        let order = Event::Order(OrderEvent::market("SPY", 100, OrderSide::Buy));
        assert!(matches!(
            strategy.calculate_signals(&order, &src),
            Err(BacktestError::InvalidEvent { .. })
        ));
        assert!(strategy
            .calculate_signals(&Event::Market(MarketEvent), &src)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_from_params_validates_windows() {
        let symbols = vec!["SPY".to_string()];
        let params = StrategyParams::new()
            .with("short_window", 50.0)
            .with("long_window", 20.0);
        assert!(MovingAverageCrossover::from_params(&symbols, &params, BarField::Close).is_err());

        let params = StrategyParams::new();
        let strategy =
            MovingAverageCrossover::from_params(&symbols, &params, BarField::Close).unwrap();
        assert_eq!(strategy.short_window, 100);
        assert_eq!(strategy.long_window, 400);
        assert!(!strategy.is_invested("SPY"));
    }
}
