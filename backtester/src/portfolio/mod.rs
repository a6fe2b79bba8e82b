pub mod sizing;

pub use sizing::{sizer_from_config, NaiveSizer, PositionSizer, StrengthScaledSizer};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{
    BacktestConfig, BacktestError, BarField, EquityRow, Event, FillEvent, HoldingsRecord,
    PositionRecord, Result, SignalEvent, SummaryStatistics,
};
use tracing::debug;

use crate::data::BarSource;
use crate::performance;
use crate::queue::EventQueue;

/// Position and holdings bookkeeping for one run.
///
/// Cash and positions move only on fills. Every market event appends one
/// positions snapshot and one holdings record marked at the latest prices.
pub struct Portfolio {
    symbols: Vec<String>,
    initial_capital: f64,
    price_field: BarField,
    periods_per_year: f64,
    sizer: Box<dyn PositionSizer>,
    all_positions: Vec<PositionRecord>,
    current_positions: BTreeMap<String, i64>,
    all_holdings: Vec<HoldingsRecord>,
    current_holdings: HoldingsRecord,
}

impl Portfolio {
    pub fn new(
        symbols: &[String],
        start_date: DateTime<Utc>,
        initial_capital: f64,
        price_field: BarField,
        periods_per_year: f64,
        sizer: Box<dyn PositionSizer>,
    ) -> Self {
        let current_positions: BTreeMap<String, i64> =
            symbols.iter().map(|s| (s.clone(), 0)).collect();
        let seed = HoldingsRecord {
            timestamp: start_date,
            cash: initial_capital,
            commission: 0.0,
            total: initial_capital,
            values: symbols.iter().map(|s| (s.clone(), 0.0)).collect(),
        };

        Self {
            symbols: symbols.to_vec(),
            initial_capital,
            price_field,
            periods_per_year,
            sizer,
            all_positions: vec![PositionRecord {
                timestamp: start_date,
                positions: current_positions.clone(),
            }],
            current_positions,
            all_holdings: vec![seed.clone()],
            current_holdings: seed,
        }
    }

    pub fn from_config(config: &BacktestConfig) -> Self {
        Self::new(
            &config.symbols,
            config.start_date,
            config.initial_capital,
            config.price_field,
            config.periods_per_year,
            sizer_from_config(&config.sizing),
        )
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn position(&self, symbol: &str) -> i64 {
        self.current_positions.get(symbol).copied().unwrap_or(0)
    }

    pub fn current_positions(&self) -> &BTreeMap<String, i64> {
        &self.current_positions
    }

    pub fn current_holdings(&self) -> &HoldingsRecord {
        &self.current_holdings
    }

    pub fn all_positions(&self) -> &[PositionRecord] {
        &self.all_positions
    }

    pub fn all_holdings(&self) -> &[HoldingsRecord] {
        &self.all_holdings
    }

    /// Canonical time of the current tick: the first symbol's latest bar,
    /// or the first symbol with any data when that one starts late
    fn tick_datetime(&self, bars: &dyn BarSource) -> Result<DateTime<Utc>> {
        let mut first_err = None;
        for symbol in &self.symbols {
            match bars.latest_bar_datetime(symbol) {
                Ok(ts) => return Ok(ts),
                Err(BacktestError::NoData { .. }) => {
                    first_err.get_or_insert(BacktestError::NoData {
                        symbol: symbol.clone(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Err(first_err.unwrap_or_else(|| {
            BacktestError::InvalidParameter("portfolio tracks no symbols".to_string())
        }))
    }

    /// Snapshot positions and mark holdings to market for the new tick
    pub fn update_timeindex(&mut self, bars: &dyn BarSource) -> Result<()> {
        let timestamp = self.tick_datetime(bars)?;

        self.all_positions.push(PositionRecord {
            timestamp,
            positions: self.current_positions.clone(),
        });

        let mut values = BTreeMap::new();
        let mut market_value = 0.0;
        for symbol in &self.symbols {
            let quantity = self.position(symbol);
            let value = match bars.latest_bar_value(symbol, self.price_field) {
                Ok(price) => quantity as f64 * price,
                // Not listed yet, so nothing can be held
                Err(BacktestError::NoData { .. }) => 0.0,
                Err(e) => return Err(e),
            };
            market_value += value;
            values.insert(symbol.clone(), value);
        }

        let record = HoldingsRecord {
            timestamp,
            cash: self.current_holdings.cash,
            commission: self.current_holdings.commission,
            total: self.current_holdings.cash + market_value,
            values,
        };
        self.all_holdings.push(record.clone());
        self.current_holdings = record;
        Ok(())
    }

    /// Size the signal and enqueue the resulting order, if any
    pub fn update_signal(&mut self, signal: &SignalEvent, events: &mut EventQueue) -> Result<()> {
        let current = *self
            .current_positions
            .get(&signal.symbol)
            .ok_or_else(|| BacktestError::NotFound {
                symbol: signal.symbol.clone(),
            })?;

        if let Some(order) = self.sizer.size_order(signal, current) {
            debug!(order = %order, direction = ?signal.direction, "order generated");
            events.enqueue(Event::Order(order));
        }
        Ok(())
    }

    /// Apply a fill to positions and holdings.
    ///
    /// The fill's own cost is used when the execution handler supplied one;
    /// otherwise the fill is priced at the latest bar.
    pub fn update_fill(&mut self, fill: &FillEvent, bars: &dyn BarSource) -> Result<()> {
        let sign = fill.side.sign();
        let quantity = fill.quantity as i64;

        let notional = match fill.fill_cost {
            Some(cost) => cost,
            None => bars.latest_bar_value(&fill.symbol, self.price_field)? * fill.quantity as f64,
        };
        let cost = sign as f64 * notional;

        let position = self
            .current_positions
            .get_mut(&fill.symbol)
            .ok_or_else(|| BacktestError::NotFound {
                symbol: fill.symbol.clone(),
            })?;
        *position += sign * quantity;

        let holdings = &mut self.current_holdings;
        *holdings.values.entry(fill.symbol.clone()).or_insert(0.0) += cost;
        holdings.commission += fill.commission;
        holdings.cash -= cost + fill.commission;
        holdings.total -= cost + fill.commission;

        debug!(
            symbol = %fill.symbol,
            side = %fill.side,
            quantity = fill.quantity,
            cost,
            commission = fill.commission,
            cash = holdings.cash,
            "fill applied"
        );
        Ok(())
    }

    /// Equity report rows and headline statistics over the holdings history
    pub fn summary_statistics(&self) -> (Vec<EquityRow>, SummaryStatistics) {
        let timestamps: Vec<DateTime<Utc>> =
            self.all_holdings.iter().map(|h| h.timestamp).collect();
        let totals: Vec<f64> = self.all_holdings.iter().map(|h| h.total).collect();
        performance::summarize(&timestamps, &totals, self.periods_per_year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::HistoricBarSource;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};
    use common::{tiered_commission, Bar, Direction, OrderSide};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    fn flat_bars(days: i64, price: f64) -> Vec<Bar> {
        (0..days)
            .map(|i| Bar::new(day(i), price, price, price, price, 1_000_000.0))
            .collect()
    }

    fn setup(symbols: &[&str], price: f64) -> (Portfolio, HistoricBarSource) {
        let symbols: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        let src = HistoricBarSource::new(
            symbols
                .iter()
                .map(|s| (s.clone(), flat_bars(10, price)))
                .collect(),
        )
        .unwrap();
        let portfolio = Portfolio::new(
            &symbols,
            day(-1),
            100_000.0,
            BarField::AdjClose,
            252.0,
            Box::new(NaiveSizer::default()),
        );
        (portfolio, src)
    }

    fn fill(side: OrderSide, quantity: u64) -> FillEvent {
        FillEvent::new(day(0), "SPY", "ARCA", quantity, side, None, None)
    }

    #[test]
    fn test_seed_records() {
        let (portfolio, _) = setup(&["SPY", "QQQ"], 10.0);

        assert_eq!(portfolio.all_positions().len(), 1);
        assert_eq!(portfolio.all_holdings().len(), 1);
        assert_eq!(portfolio.current_holdings().cash, 100_000.0);
        assert_eq!(portfolio.current_holdings().total, 100_000.0);
        assert_eq!(portfolio.all_holdings()[0].timestamp, day(-1));
        assert_eq!(portfolio.position("QQQ"), 0);
    }

    #[test]
    fn test_cash_conservation_on_fill() {
        let (mut portfolio, mut src) = setup(&["SPY"], 50.0);
        let mut events = EventQueue::new();
        src.advance(&mut events);

        let before = portfolio.current_holdings().cash;
        portfolio.update_fill(&fill(OrderSide::Buy, 100), &src).unwrap();
        let after = portfolio.current_holdings().cash;

        assert_relative_eq!(after, before - 50.0 * 100.0 - tiered_commission(100), epsilon = 1e-9);
        assert_eq!(portfolio.position("SPY"), 100);
        assert_eq!(portfolio.current_holdings().values["SPY"], 5000.0);
    }

    #[test]
    fn test_round_trip_returns_position_and_cash() {
        let (mut portfolio, mut src) = setup(&["SPY"], 50.0);
        let mut events = EventQueue::new();
        src.advance(&mut events);

        for _ in 0..5 {
            portfolio.update_fill(&fill(OrderSide::Buy, 100), &src).unwrap();
            portfolio.update_fill(&fill(OrderSide::Sell, 100), &src).unwrap();
        }

        assert_eq!(portfolio.position("SPY"), 0);
        let commission = 10.0 * tiered_commission(100);
        assert_relative_eq!(portfolio.current_holdings().commission, commission, epsilon = 1e-9);
        assert_relative_eq!(
            portfolio.current_holdings().cash,
            100_000.0 - commission,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_round_trip_at_different_prices() {
        let (mut portfolio, mut src) = setup(&["SPY"], 50.0);
        let mut events = EventQueue::new();
        src.advance(&mut events);

        let trades = [
            (OrderSide::Buy, 100, 5_000.0),
            (OrderSide::Sell, 100, 6_250.0),
            (OrderSide::Sell, 300, 13_500.0),
            (OrderSide::Buy, 300, 12_000.0),
        ];
        for (side, quantity, cost) in trades {
            let priced = FillEvent::new(day(0), "SPY", "ARCA", quantity, side, Some(cost), None);
            portfolio.update_fill(&priced, &src).unwrap();
        }

        assert_eq!(portfolio.position("SPY"), 0);
        let commission = 2.0 * tiered_commission(100) + 2.0 * tiered_commission(300);
        assert_relative_eq!(portfolio.current_holdings().commission, commission, epsilon = 1e-9);
        assert_relative_eq!(
            portfolio.current_holdings().cash,
            100_000.0 + 1_250.0 + 1_500.0 - commission,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_fill_cost_preferred_over_bar_price() {
        let (mut portfolio, mut src) = setup(&["SPY"], 50.0);
        let mut events = EventQueue::new();
        src.advance(&mut events);

        let priced = FillEvent::new(
            day(0),
            "SPY",
            "ARCA",
            100,
            OrderSide::Buy,
            Some(5_100.0),
            Some(1.0),
        );
        portfolio.update_fill(&priced, &src).unwrap();

        assert_eq!(portfolio.current_holdings().cash, 100_000.0 - 5_100.0 - 1.0);
    }

    #[test]
    fn test_update_timeindex_marks_to_market() {
        let (mut portfolio, mut src) = setup(&["SPY", "QQQ"], 20.0);
        let mut events = EventQueue::new();

        src.advance(&mut events);
        portfolio.update_timeindex(&src).unwrap();
        portfolio.update_fill(&fill(OrderSide::Buy, 100), &src).unwrap();
        // Snapshot taken before the fill
        assert_eq!(portfolio.all_positions()[1].positions["SPY"], 0);

        src.advance(&mut events);
        portfolio.update_timeindex(&src).unwrap();

        let latest = portfolio.all_holdings().last().unwrap();
        assert_eq!(latest.timestamp, day(1));
        assert_eq!(latest.values["SPY"], 2000.0);
        assert_eq!(latest.values["QQQ"], 0.0);
        assert_relative_eq!(latest.total, latest.cash + 2000.0);
        assert_eq!(portfolio.all_positions()[2].positions["SPY"], 100);
        assert_eq!(portfolio.all_holdings().len(), 3);
    }

    #[test]
    fn test_long_signal_enqueues_order() {
        let (mut portfolio, _) = setup(&["SPY"], 20.0);
        let mut events = EventQueue::new();

        let signal = SignalEvent::new(1, "SPY", day(0), Direction::Long, 1.0);
        portfolio.update_signal(&signal, &mut events).unwrap();

        match events.try_dequeue() {
            Some(Event::Order(order)) => {
                assert_eq!(order.side, OrderSide::Buy);
                assert_eq!(order.quantity, 100);
            }
            other => panic!("expected order, got {:?}", other),
        }
    }

    #[test]
    fn test_exit_when_flat_enqueues_nothing() {
        let (mut portfolio, _) = setup(&["SPY"], 20.0);
        let mut events = EventQueue::new();

        let signal = SignalEvent::new(1, "SPY", day(0), Direction::Exit, 1.0);
        portfolio.update_signal(&signal, &mut events).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_unknown_symbol_rejected() {
        let (mut portfolio, mut src) = setup(&["SPY"], 20.0);
        let mut events = EventQueue::new();
        src.advance(&mut events);
        events.try_dequeue();

        let signal = SignalEvent::new(1, "TSLA", day(0), Direction::Long, 1.0);
        assert!(matches!(
            portfolio.update_signal(&signal, &mut events),
            Err(BacktestError::NotFound { .. })
        ));
        assert!(events.is_empty());
        assert_eq!(portfolio.current_holdings().cash, 100_000.0);
    }
}
