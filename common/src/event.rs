//! Events flowing through the backtest queue.
//!
//! A tick produces one `Market` event; strategies answer with `Signal`s,
//! the portfolio sizes them into `Order`s, and the execution handler
//! confirms them as `Fill`s.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Direction, OrderKind, OrderSide};

/// Kind tag of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Market,
    Signal,
    Order,
    Fill,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Market => "MARKET",
            EventKind::Signal => "SIGNAL",
            EventKind::Order => "ORDER",
            EventKind::Fill => "FILL",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Market(MarketEvent),
    Signal(SignalEvent),
    Order(OrderEvent),
    Fill(FillEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Market(_) => EventKind::Market,
            Event::Signal(_) => EventKind::Signal,
            Event::Order(_) => EventKind::Order,
            Event::Fill(_) => EventKind::Fill,
        }
    }
}

/// New bars are available for every tracked symbol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketEvent;

/// Advisory direction from a strategy; not yet sized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub strategy_id: u32,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    /// Sizing hint, e.g. a pair hedge ratio
    pub strength: f64,
}

impl SignalEvent {
    pub fn new(
        strategy_id: u32,
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        direction: Direction,
        strength: f64,
    ) -> Self {
        Self {
            strategy_id,
            symbol: symbol.into(),
            timestamp,
            direction,
            strength,
        }
    }
}

/// Sized instruction to transact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub symbol: String,
    pub kind: OrderKind,
    pub quantity: u64,
    pub side: OrderSide,
}

impl OrderEvent {
    pub fn market(symbol: impl Into<String>, quantity: u64, side: OrderSide) -> Self {
        Self {
            symbol: symbol.into(),
            kind: OrderKind::Market,
            quantity,
            side,
        }
    }
}

impl fmt::Display for OrderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Order: symbol={}, kind={:?}, quantity={}, side={}",
            self.symbol, self.kind, self.quantity, self.side
        )
    }
}

/// Confirmed execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub venue: String,
    pub quantity: u64,
    pub side: OrderSide,
    /// Total unsigned notional of the fill. `None` means the portfolio
    /// prices the fill from its latest bar.
    pub fill_cost: Option<f64>,
    pub commission: f64,
}

impl FillEvent {
    /// Builds a fill, charging the tiered schedule when no commission is given
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: impl Into<String>,
        venue: impl Into<String>,
        quantity: u64,
        side: OrderSide,
        fill_cost: Option<f64>,
        commission: Option<f64>,
    ) -> Self {
        Self {
            timestamp,
            symbol: symbol.into(),
            venue: venue.into(),
            quantity,
            side,
            fill_cost,
            commission: commission.unwrap_or_else(|| tiered_commission(quantity)),
        }
    }
}

/// Per-share fee schedule with a $1.30 minimum.
///
/// 0.013/share up to 500 shares, 0.008/share above.
pub fn tiered_commission(quantity: u64) -> f64 {
    let q = quantity as f64;
    if quantity <= 500 {
        (0.013 * q).max(1.3)
    } else {
        (0.008 * q).max(1.3)
    }
}
