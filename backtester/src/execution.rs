//! Order execution handlers
//!
//! Every handler turns orders into fills on the event queue:
//! - Immediate full fills priced by the portfolio
//! - Fills released a fixed number of ticks after the order
//! - Seeded random slippage with adverse probability bias
//! - Volume-based partial fills

use std::collections::VecDeque;

use common::{
    BacktestConfig, BacktestError, Bar, BarField, Event, ExecutionConfig, ExecutionMode, FillEvent,
    OrderEvent, OrderSide, Result,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::data::BarSource;
use crate::queue::EventQueue;

/// Converts orders into fills.
///
/// `execute_order` may enqueue the fill immediately or hold the order;
/// `on_market` runs once per tick so held orders can be released later.
pub trait ExecutionHandler {
    fn execute_order(
        &mut self,
        order: &OrderEvent,
        bars: &dyn BarSource,
        events: &mut EventQueue,
    ) -> Result<()>;

    fn on_market(&mut self, _bars: &dyn BarSource, _events: &mut EventQueue) -> Result<()> {
        Ok(())
    }
}

/// Build the handler selected by `config.execution`, pricing fills on the
/// same field the portfolio marks positions with
pub fn handler_from_config(config: &BacktestConfig) -> Box<dyn ExecutionHandler> {
    let execution = &config.execution;
    match execution.mode {
        ExecutionMode::Simulated => Box::new(SimulatedExecutionHandler::new(&execution.venue)),
        ExecutionMode::Delayed => Box::new(DelayedExecutionHandler::new(
            &execution.venue,
            execution.latency_ticks,
        )),
        ExecutionMode::Slippage => Box::new(SlippageExecutionHandler::new(
            execution.clone(),
            config.price_field,
        )),
    }
}

/// Immediate full fill at the order symbol's latest bar.
///
/// `fill_cost` is left empty so the portfolio prices the fill itself, and
/// commission follows the tiered schedule.
#[derive(Debug, Clone)]
pub struct SimulatedExecutionHandler {
    venue: String,
}

impl SimulatedExecutionHandler {
    pub fn new(venue: &str) -> Self {
        Self {
            venue: venue.to_string(),
        }
    }
}

impl Default for SimulatedExecutionHandler {
    fn default() -> Self {
        Self::new("ARCA")
    }
}

fn immediate_fill(order: &OrderEvent, bars: &dyn BarSource, venue: &str) -> Result<FillEvent> {
    let timestamp = bars.latest_bar_datetime(&order.symbol)?;
    Ok(FillEvent::new(
        timestamp,
        order.symbol.clone(),
        venue,
        order.quantity,
        order.side,
        None,
        None,
    ))
}

impl ExecutionHandler for SimulatedExecutionHandler {
    fn execute_order(
        &mut self,
        order: &OrderEvent,
        bars: &dyn BarSource,
        events: &mut EventQueue,
    ) -> Result<()> {
        let fill = immediate_fill(order, bars, &self.venue)?;
        events.enqueue(Event::Fill(fill));
        Ok(())
    }
}

/// Order waiting out its latency
#[derive(Debug, Clone)]
struct PendingOrder {
    order: OrderEvent,
    ticks_remaining: usize,
}

/// Holds each order for `latency_ticks` market events before filling it
/// at the bar current at release time
#[derive(Debug, Clone)]
pub struct DelayedExecutionHandler {
    venue: String,
    latency_ticks: usize,
    pending_orders: VecDeque<PendingOrder>,
}

impl DelayedExecutionHandler {
    pub fn new(venue: &str, latency_ticks: usize) -> Self {
        Self {
            venue: venue.to_string(),
            latency_ticks,
            pending_orders: VecDeque::new(),
        }
    }

    pub fn pending_order_count(&self) -> usize {
        self.pending_orders.len()
    }
}

impl ExecutionHandler for DelayedExecutionHandler {
    fn execute_order(
        &mut self,
        order: &OrderEvent,
        bars: &dyn BarSource,
        events: &mut EventQueue,
    ) -> Result<()> {
        if self.latency_ticks == 0 {
            let fill = immediate_fill(order, bars, &self.venue)?;
            events.enqueue(Event::Fill(fill));
            return Ok(());
        }
        debug!(order = %order, ticks = self.latency_ticks, "order queued");
        self.pending_orders.push_back(PendingOrder {
            order: order.clone(),
            ticks_remaining: self.latency_ticks,
        });
        Ok(())
    }

    fn on_market(&mut self, bars: &dyn BarSource, events: &mut EventQueue) -> Result<()> {
        for pending in &mut self.pending_orders {
            pending.ticks_remaining = pending.ticks_remaining.saturating_sub(1);
        }

        // Ready orders stay queued until every one of them can be filled
        let fills = self
            .pending_orders
            .iter()
            .filter(|p| p.ticks_remaining == 0)
            .map(|p| immediate_fill(&p.order, bars, &self.venue))
            .collect::<Result<Vec<_>>>()?;
        self.pending_orders.retain(|p| p.ticks_remaining > 0);

        for fill in fills {
            events.enqueue(Event::Fill(fill));
        }
        Ok(())
    }
}

/// Fills at the latest `price_field` value moved by seeded random slippage,
/// capped by a share of the bar's volume.
///
/// The fill carries its own `fill_cost`, so the portfolio books the
/// slipped price rather than its own mark. `price_field` must match the
/// portfolio's or every fill books a phantom gain or loss.
pub struct SlippageExecutionHandler {
    config: ExecutionConfig,
    price_field: BarField,
    rng: StdRng,
}

impl SlippageExecutionHandler {
    pub fn new(config: ExecutionConfig, price_field: BarField) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            price_field,
            rng,
        }
    }

    /// Signed price adjustment; adverse moves raise buys and lower sells
    fn slippage(&mut self, price: f64, side: OrderSide) -> f64 {
        let is_adverse = self.rng.gen::<f64>() < self.config.slippage_adverse_probability;

        let slippage_pct = if is_adverse {
            let max = self.config.slippage_max_pct.abs();
            if max > 0.0 {
                self.rng.gen_range(0.0..max)
            } else {
                0.0
            }
        } else {
            let min = self.config.slippage_min_pct;
            if min < 0.0 {
                self.rng.gen_range(min..0.0)
            } else {
                0.0
            }
        };

        price * slippage_pct * side.sign() as f64
    }

    /// Quantity the bar's volume can absorb; 0 rejects the order
    fn fill_quantity(&self, bar: &Bar, quantity: u64) -> u64 {
        let max_by_volume = (bar.volume * self.config.volume_participation_max_pct).floor();
        if max_by_volume <= 0.0 || !max_by_volume.is_finite() {
            return 0;
        }
        let max_by_volume = max_by_volume as u64;

        if quantity <= max_by_volume {
            quantity
        } else if self.config.partial_fill_enabled {
            debug!(
                requested = quantity,
                filled = max_by_volume,
                "partial fill due to volume constraints"
            );
            max_by_volume
        } else {
            0
        }
    }
}

impl ExecutionHandler for SlippageExecutionHandler {
    fn execute_order(
        &mut self,
        order: &OrderEvent,
        bars: &dyn BarSource,
        events: &mut EventQueue,
    ) -> Result<()> {
        let bar = bars.latest_bar(&order.symbol)?;

        let quantity = self.fill_quantity(bar, order.quantity);
        if quantity == 0 {
            debug!(order = %order, "order rejected: exceeds volume participation limit");
            return Ok(());
        }

        let base_price = bar.field(self.price_field).ok_or_else(|| {
            BacktestError::InvalidField(format!("{} for {}", self.price_field, order.symbol))
        })?;
        // Keep the slipped price inside the bar's range, rescaled onto the
        // priced field (adjusted prices sit below the raw low/high)
        let scale = if bar.close > 0.0 {
            base_price / bar.close
        } else {
            1.0
        };
        let price = (base_price + self.slippage(base_price, order.side))
            .max(bar.low * scale)
            .min(bar.high * scale);

        let fill = FillEvent::new(
            bar.timestamp,
            order.symbol.clone(),
            self.config.venue.as_str(),
            quantity,
            order.side,
            Some(price * quantity as f64),
            None,
        );
        events.enqueue(Event::Fill(fill));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::HistoricBarSource;
    use chrono::{Duration, TimeZone, Utc};

    fn source(volume: f64) -> HistoricBarSource {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = (0..5)
            .map(|i| {
                let close = 100.0 + i as f64;
                Bar::new(start + Duration::days(i), close, close + 1.0, close - 1.0, close, volume)
            })
            .collect();
        HistoricBarSource::new(vec![("SPY".to_string(), bars)]).unwrap()
    }

    fn fills(events: &mut EventQueue) -> Vec<FillEvent> {
        let mut out = Vec::new();
        while let Some(event) = events.try_dequeue() {
            if let Event::Fill(fill) = event {
                out.push(fill);
            }
        }
        out
    }

    #[test]
    fn test_simulated_fill_is_immediate_and_unpriced() {
        let mut src = source(1_000_000.0);
        let mut events = EventQueue::new();
        src.advance(&mut events);
        events.try_dequeue();

        let mut handler = SimulatedExecutionHandler::default();
        let order = OrderEvent::market("SPY", 100, OrderSide::Buy);
        handler.execute_order(&order, &src, &mut events).unwrap();

        let fills = fills(&mut events);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].venue, "ARCA");
        assert_eq!(fills[0].quantity, 100);
        assert_eq!(fills[0].fill_cost, None);
        assert_eq!(fills[0].commission, common::tiered_commission(100));
        assert_eq!(fills[0].timestamp, src.latest_bar_datetime("SPY").unwrap());
    }

    #[test]
    fn test_simulated_fill_without_data_fails() {
        let src = source(1_000_000.0);
        let mut events = EventQueue::new();
        let mut handler = SimulatedExecutionHandler::default();

        let order = OrderEvent::market("SPY", 100, OrderSide::Buy);
        assert!(handler.execute_order(&order, &src, &mut events).is_err());
        assert!(events.is_empty());
    }

    #[test]
    fn test_delayed_release_after_latency() {
        let mut src = source(1_000_000.0);
        let mut events = EventQueue::new();
        let mut handler = DelayedExecutionHandler::new("ARCA", 2);

        src.advance(&mut events);
        events.try_dequeue();
        let order = OrderEvent::market("SPY", 100, OrderSide::Sell);
        handler.execute_order(&order, &src, &mut events).unwrap();
        assert!(events.is_empty());
        assert_eq!(handler.pending_order_count(), 1);

        src.advance(&mut events);
        events.try_dequeue();
        handler.on_market(&src, &mut events).unwrap();
        assert!(events.is_empty());

        src.advance(&mut events);
        events.try_dequeue();
        handler.on_market(&src, &mut events).unwrap();
        let fills = fills(&mut events);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].side, OrderSide::Sell);
        assert_eq!(fills[0].timestamp, src.latest_bar_datetime("SPY").unwrap());
        assert_eq!(handler.pending_order_count(), 0);
    }

    #[test]
    fn test_delayed_keeps_ready_orders_when_a_fill_fails() {
        let mut src = source(1_000_000.0);
        let mut events = EventQueue::new();
        let mut handler = DelayedExecutionHandler::new("ARCA", 1);

        src.advance(&mut events);
        events.try_dequeue();
        for symbol in ["QQQ", "SPY"] {
            let order = OrderEvent::market(symbol, 100, OrderSide::Buy);
            handler.execute_order(&order, &src, &mut events).unwrap();
        }

        src.advance(&mut events);
        events.try_dequeue();
        assert!(handler.on_market(&src, &mut events).is_err());
        assert!(events.is_empty());
        assert_eq!(handler.pending_order_count(), 2);
    }

    #[test]
    fn test_zero_latency_fills_immediately() {
        let mut src = source(1_000_000.0);
        let mut events = EventQueue::new();
        src.advance(&mut events);
        events.try_dequeue();

        let mut handler = DelayedExecutionHandler::new("ARCA", 0);
        let order = OrderEvent::market("SPY", 10, OrderSide::Buy);
        handler.execute_order(&order, &src, &mut events).unwrap();
        assert_eq!(fills(&mut events).len(), 1);
    }

    #[test]
    fn test_slippage_direction_and_range() {
        let mut src = source(1_000_000.0);
        let mut events = EventQueue::new();
        src.advance(&mut events);
        events.try_dequeue();

        let mut config = ExecutionConfig::slippage();
        config.slippage_adverse_probability = 1.0;
        let mut handler = SlippageExecutionHandler::new(config, BarField::Close);

        let bar = src.latest_bar("SPY").unwrap().clone();
        handler
            .execute_order(&OrderEvent::market("SPY", 100, OrderSide::Buy), &src, &mut events)
            .unwrap();
        handler
            .execute_order(&OrderEvent::market("SPY", 100, OrderSide::Sell), &src, &mut events)
            .unwrap();

        let fills = fills(&mut events);
        let buy_price = fills[0].fill_cost.unwrap() / 100.0;
        let sell_price = fills[1].fill_cost.unwrap() / 100.0;
        assert!(buy_price >= bar.close && buy_price <= bar.high);
        assert!(sell_price <= bar.close && sell_price >= bar.low);
    }

    #[test]
    fn test_slippage_is_seeded() {
        let run = || {
            let mut src = source(1_000_000.0);
            let mut events = EventQueue::new();
            src.advance(&mut events);
            events.try_dequeue();
            let mut handler =
                SlippageExecutionHandler::new(ExecutionConfig::slippage(), BarField::Close);
            for _ in 0..5 {
                handler
                    .execute_order(&OrderEvent::market("SPY", 100, OrderSide::Buy), &src, &mut events)
                    .unwrap();
            }
            fills(&mut events)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_volume_constraint_partial_fill() {
        let mut src = source(100_000.0);
        let mut events = EventQueue::new();
        src.advance(&mut events);
        events.try_dequeue();

        let mut config = ExecutionConfig::slippage();
        config.volume_participation_max_pct = 0.01;
        let mut handler = SlippageExecutionHandler::new(config.clone(), BarField::Close);

        handler
            .execute_order(&OrderEvent::market("SPY", 2000, OrderSide::Buy), &src, &mut events)
            .unwrap();
        let fills_partial = fills(&mut events);
        assert_eq!(fills_partial[0].quantity, 1000);

        config.partial_fill_enabled = false;
        let mut handler = SlippageExecutionHandler::new(config, BarField::Close);
        handler
            .execute_order(&OrderEvent::market("SPY", 2000, OrderSide::Buy), &src, &mut events)
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_handler_from_config() {
        let mut src = source(1_000_000.0);
        let mut events = EventQueue::new();
        src.advance(&mut events);
        events.try_dequeue();

        let config = BacktestConfig::default().with_execution(ExecutionConfig::delayed(1));
        let mut handler = handler_from_config(&config);
        handler
            .execute_order(&OrderEvent::market("SPY", 100, OrderSide::Buy), &src, &mut events)
            .unwrap();
        assert!(events.is_empty());
        handler.on_market(&src, &mut events).unwrap();
        assert_eq!(fills(&mut events).len(), 1);
    }

    #[test]
    fn test_slippage_prices_the_configured_field() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = (0..3)
            .map(|i| {
                Bar::new(start + Duration::days(i), 100.0, 101.0, 99.0, 100.0, 1_000_000.0)
                    .with_adj_close(50.0)
            })
            .collect();
        let mut src = HistoricBarSource::new(vec![("SPY".to_string(), bars)]).unwrap();
        let mut events = EventQueue::new();
        src.advance(&mut events);
        events.try_dequeue();

        let mut execution = ExecutionConfig::slippage();
        execution.slippage_min_pct = 0.0;
        execution.slippage_max_pct = 0.0;
        let config = BacktestConfig::default()
            .with_price_field(BarField::AdjClose)
            .with_execution(execution);
        let mut handler = handler_from_config(&config);

        handler
            .execute_order(&OrderEvent::market("SPY", 100, OrderSide::Buy), &src, &mut events)
            .unwrap();
        let fills = fills(&mut events);
        assert_eq!(fills[0].fill_cost, Some(5_000.0));
    }
}
