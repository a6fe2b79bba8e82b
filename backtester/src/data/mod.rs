pub mod historic;
pub mod loader;
pub mod streaming;
pub mod synthetic;

pub use historic::HistoricBarSource;
pub use loader::{load_csv, load_json};
pub use streaming::{BarBatch, StreamingBarSource};
pub use synthetic::{generate_bars_with_pattern, generate_synthetic_bars};

use std::path::Path;

use chrono::{DateTime, Utc};
use common::{BacktestError, Bar, BarField, BarLayout, Result};

use crate::queue::EventQueue;

/// Market data feed seen by strategies and the portfolio.
///
/// Historic replay and live feeds implement the same trait, so nothing
/// downstream changes when the source does. Only bars revealed by
/// `advance` are visible through the query methods.
pub trait BarSource {
    /// Tracked symbols, in configuration order
    fn symbols(&self) -> &[String];

    /// Most recently revealed bar
    fn latest_bar(&self, symbol: &str) -> Result<&Bar>;

    /// Last `min(n, revealed)` bars, oldest first
    fn latest_bars(&self, symbol: &str, n: usize) -> Result<&[Bar]>;

    /// Reveal the next bar for every symbol that has one and enqueue a
    /// single market event; clears `continue_backtest` once nothing advances.
    fn advance(&mut self, events: &mut EventQueue);

    fn continue_backtest(&self) -> bool;

    fn latest_bar_datetime(&self, symbol: &str) -> Result<DateTime<Utc>> {
        self.latest_bar(symbol).map(|bar| bar.timestamp)
    }

    fn latest_bar_value(&self, symbol: &str, field: BarField) -> Result<f64> {
        let bar = self.latest_bar(symbol)?;
        bar.field(field)
            .ok_or_else(|| BacktestError::InvalidField(format!("{} for {}", field, symbol)))
    }

    fn latest_bars_values(&self, symbol: &str, field: BarField, n: usize) -> Result<Vec<f64>> {
        self.latest_bars(symbol, n)?
            .iter()
            .map(|bar| {
                bar.field(field).ok_or_else(|| {
                    BacktestError::InvalidField(format!("{} for {}", field, symbol))
                })
            })
            .collect()
    }
}

/// Load bars from file, detecting format from extension
pub fn load_file(path: &Path, layout: BarLayout) -> Result<Vec<Bar>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "csv" => load_csv(path, layout),
        "json" => load_json(path),
        _ => Err(BacktestError::DataLoadError(format!(
            "Unsupported file format: {}",
            ext
        ))),
    }
}
