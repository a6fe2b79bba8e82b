use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StrategyParams;
use crate::error::BacktestError;

/// OHLCV bar data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub adj_close: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_interest: Option<f64>,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            adj_close: close,
            open_interest: None,
        }
    }

    pub fn with_adj_close(mut self, adj_close: f64) -> Self {
        self.adj_close = adj_close;
        self
    }

    /// Scalar value of one field; `None` when the bar does not carry it
    pub fn field(&self, field: BarField) -> Option<f64> {
        match field {
            BarField::Open => Some(self.open),
            BarField::High => Some(self.high),
            BarField::Low => Some(self.low),
            BarField::Close => Some(self.close),
            BarField::Volume => Some(self.volume),
            BarField::AdjClose => Some(self.adj_close),
            BarField::OpenInterest => self.open_interest,
        }
    }
}

/// Named scalar column of a bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarField {
    Open,
    High,
    Low,
    Close,
    Volume,
    AdjClose,
    OpenInterest,
}

impl fmt::Display for BarField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BarField::Open => "open",
            BarField::High => "high",
            BarField::Low => "low",
            BarField::Close => "close",
            BarField::Volume => "volume",
            BarField::AdjClose => "adj_close",
            BarField::OpenInterest => "open_interest",
        };
        f.write_str(name)
    }
}

impl FromStr for BarField {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(BarField::Open),
            "high" => Ok(BarField::High),
            "low" => Ok(BarField::Low),
            "close" => Ok(BarField::Close),
            "volume" => Ok(BarField::Volume),
            "adj_close" | "adjusted_close" => Ok(BarField::AdjClose),
            "oi" | "open_interest" => Ok(BarField::OpenInterest),
            other => Err(BacktestError::InvalidField(other.to_string())),
        }
    }
}

/// Column order of a per-symbol bar CSV
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarLayout {
    /// datetime, open, high, low, close, volume, adj_close
    #[default]
    Daily,
    /// datetime, open, low, high, close, volume, open_interest
    Intraday,
}

/// Signal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
    Exit,
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells
    pub fn sign(self) -> i64 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => f.write_str("BUY"),
            OrderSide::Sell => f.write_str("SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    Market,
    Limit,
}

/// Positions snapshot for one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub timestamp: DateTime<Utc>,
    pub positions: BTreeMap<String, i64>,
}

/// Holdings snapshot for one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingsRecord {
    pub timestamp: DateTime<Utc>,
    pub cash: f64,
    pub commission: f64,
    pub total: f64,
    pub values: BTreeMap<String, f64>,
}

/// One row of the equity report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityRow {
    pub datetime: DateTime<Utc>,
    pub total: f64,
    pub returns: f64,
    pub equity_curve: f64,
    pub drawdown: f64,
}

/// Summary statistics for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub total_return_pct: f64,
    pub cagr_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown_pct: f64,
    pub max_drawdown_duration: u64,
    pub final_equity: f64,
}

/// Events handled by the driver during one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    pub ticks: u64,
    pub signals: u64,
    pub orders: u64,
    pub fills: u64,
}

/// Backtest result for one parameter variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub params: StrategyParams,
    pub stats: SummaryStatistics,
    pub counts: EventCounts,
    pub equity_curve: Vec<EquityRow>,
    pub final_positions: BTreeMap<String, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    pub initial_capital: f64,
    pub execution_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_bar_field_lookup() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let bar = Bar::new(ts, 10.0, 12.0, 9.0, 11.0, 5000.0).with_adj_close(10.5);

        assert_eq!(bar.field(BarField::Close), Some(11.0));
        assert_eq!(bar.field(BarField::AdjClose), Some(10.5));
        assert_eq!(bar.field(BarField::OpenInterest), None);
    }

    #[test]
    fn test_bar_field_from_str() {
        assert_eq!("adj_close".parse::<BarField>().unwrap(), BarField::AdjClose);
        assert_eq!("Adjusted_Close".parse::<BarField>().unwrap(), BarField::AdjClose);
        assert_eq!("oi".parse::<BarField>().unwrap(), BarField::OpenInterest);
        assert!(matches!(
            "vwap".parse::<BarField>(),
            Err(BacktestError::InvalidField(_))
        ));
    }

    #[test]
    fn test_order_side_sign() {
        assert_eq!(OrderSide::Buy.sign(), 1);
        assert_eq!(OrderSide::Sell.sign(), -1);
    }
}
