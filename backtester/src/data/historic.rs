use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};
use common::{BacktestError, Bar, BarLayout, Event, MarketEvent, Result};
use tracing::info;

use super::{load_file, BarSource};
use crate::queue::EventQueue;

/// One symbol's bars aligned to the shared calendar
#[derive(Debug)]
struct SymbolSeries {
    /// Calendar index of the first bar
    offset: usize,
    bars: Vec<Bar>,
    revealed: usize,
}

/// Replays preloaded bars one tick at a time.
///
/// At construction every symbol is reindexed onto the union of all symbol
/// calendars, forward-filling gaps with the previous bar. A symbol whose
/// history starts later than the calendar stays empty until its first bar.
#[derive(Debug)]
pub struct HistoricBarSource {
    symbols: Vec<String>,
    index: HashMap<String, usize>,
    series: Vec<SymbolSeries>,
    calendar: Vec<DateTime<Utc>>,
    cursor: usize,
    continue_backtest: bool,
}

impl HistoricBarSource {
    /// Build from bars keyed by symbol; symbol order is preserved
    pub fn new(data: Vec<(String, Vec<Bar>)>) -> Result<Self> {
        if data.is_empty() {
            return Err(BacktestError::InvalidParameter(
                "bar source needs at least one symbol".to_string(),
            ));
        }

        let mut calendar = BTreeSet::new();
        for (symbol, bars) in &data {
            if bars.is_empty() {
                return Err(BacktestError::DataLoadError(format!(
                    "no bars for {}",
                    symbol
                )));
            }
            calendar.extend(bars.iter().map(|b| b.timestamp));
        }
        let calendar: Vec<DateTime<Utc>> = calendar.into_iter().collect();

        let mut symbols = Vec::with_capacity(data.len());
        let mut index = HashMap::with_capacity(data.len());
        let mut series = Vec::with_capacity(data.len());

        for (symbol, mut bars) in data {
            if index.contains_key(&symbol) {
                return Err(BacktestError::InvalidParameter(format!(
                    "duplicate symbol {}",
                    symbol
                )));
            }
            bars.sort_by_key(|b| b.timestamp);
            index.insert(symbol.clone(), symbols.len());
            symbols.push(symbol);
            series.push(align_to_calendar(&calendar, bars));
        }

        Ok(Self {
            symbols,
            index,
            series,
            calendar,
            cursor: 0,
            continue_backtest: true,
        })
    }

    /// Load `<dir>/<SYMBOL>.csv` for each symbol, falling back to
    /// `<SYMBOL>.json` when only that exists
    pub fn from_dir(dir: &Path, symbols: &[String], layout: BarLayout) -> Result<Self> {
        let mut data = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let csv = dir.join(format!("{}.csv", symbol));
            let json = dir.join(format!("{}.json", symbol));
            let path = if !csv.exists() && json.exists() { json } else { csv };
            let bars = load_file(&path, layout)?;
            info!(symbol = %symbol, bars = bars.len(), "loaded bars");
            data.push((symbol.clone(), bars));
        }
        Self::new(data)
    }

    /// Number of ticks the replay will produce
    pub fn calendar_len(&self) -> usize {
        self.calendar.len()
    }

    /// Timestamp of the most recent tick, if any
    pub fn current_datetime(&self) -> Option<DateTime<Utc>> {
        self.cursor
            .checked_sub(1)
            .and_then(|i| self.calendar.get(i))
            .copied()
    }

    fn series(&self, symbol: &str) -> Result<&SymbolSeries> {
        self.index
            .get(symbol)
            .map(|&i| &self.series[i])
            .ok_or_else(|| BacktestError::NotFound {
                symbol: symbol.to_string(),
            })
    }
}

/// Reindex sorted bars onto the calendar, padding gaps with the prior bar
fn align_to_calendar(calendar: &[DateTime<Utc>], bars: Vec<Bar>) -> SymbolSeries {
    let first = bars[0].timestamp;
    let offset = calendar.partition_point(|ts| *ts < first);

    let mut aligned = Vec::with_capacity(calendar.len() - offset);
    let mut source = bars.into_iter().peekable();
    let mut last: Option<Bar> = None;

    for &ts in &calendar[offset..] {
        // Duplicate timestamps keep the last row
        while let Some(bar) = source.next_if(|b| b.timestamp <= ts) {
            last = Some(bar);
        }
        if let Some(prev) = &last {
            let mut bar = prev.clone();
            bar.timestamp = ts;
            aligned.push(bar);
        }
    }

    SymbolSeries {
        offset,
        bars: aligned,
        revealed: 0,
    }
}

impl BarSource for HistoricBarSource {
    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    fn latest_bar(&self, symbol: &str) -> Result<&Bar> {
        let series = self.series(symbol)?;
        series
            .revealed
            .checked_sub(1)
            .map(|i| &series.bars[i])
            .ok_or_else(|| BacktestError::NoData {
                symbol: symbol.to_string(),
            })
    }

    fn latest_bars(&self, symbol: &str, n: usize) -> Result<&[Bar]> {
        let series = self.series(symbol)?;
        let end = series.revealed;
        let start = end.saturating_sub(n);
        Ok(&series.bars[start..end])
    }

    fn advance(&mut self, events: &mut EventQueue) {
        let tick = self.cursor;
        let mut advanced = false;

        for series in &mut self.series {
            if tick < series.offset {
                continue;
            }
            if tick - series.offset < series.bars.len() {
                series.revealed = tick - series.offset + 1;
                advanced = true;
            }
        }

        if advanced {
            self.cursor += 1;
            events.enqueue(Event::Market(MarketEvent));
        } else {
            self.continue_backtest = false;
        }
    }

    fn continue_backtest(&self) -> bool {
        self.continue_backtest
    }
}
