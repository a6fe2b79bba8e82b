//! Live-style bar source fed over a channel.
//!
//! A feed thread pushes one `BarBatch` per heartbeat; `advance` waits up to
//! `poll_timeout` for the next batch. The backtest stops when the sender
//! side hangs up.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use common::{BacktestError, Bar, Event, MarketEvent, Result};
use tracing::warn;

use super::BarSource;
use crate::queue::EventQueue;

/// Bars arriving together for one heartbeat, keyed by symbol
pub type BarBatch = HashMap<String, Bar>;

pub struct StreamingBarSource {
    symbols: Vec<String>,
    index: HashMap<String, usize>,
    received: Vec<Vec<Bar>>,
    feed: Receiver<BarBatch>,
    poll_timeout: Duration,
    continue_backtest: bool,
}

impl StreamingBarSource {
    pub fn new(symbols: Vec<String>, feed: Receiver<BarBatch>, poll_timeout: Duration) -> Self {
        let index = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();
        let received = vec![Vec::new(); symbols.len()];
        Self {
            symbols,
            index,
            received,
            feed,
            poll_timeout,
            continue_backtest: true,
        }
    }

    fn bars(&self, symbol: &str) -> Result<&Vec<Bar>> {
        self.index
            .get(symbol)
            .map(|&i| &self.received[i])
            .ok_or_else(|| BacktestError::NotFound {
                symbol: symbol.to_string(),
            })
    }
}

impl BarSource for StreamingBarSource {
    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    fn latest_bar(&self, symbol: &str) -> Result<&Bar> {
        self.bars(symbol)?
            .last()
            .ok_or_else(|| BacktestError::NoData {
                symbol: symbol.to_string(),
            })
    }

    fn latest_bars(&self, symbol: &str, n: usize) -> Result<&[Bar]> {
        let bars = self.bars(symbol)?;
        let start = bars.len().saturating_sub(n);
        Ok(&bars[start..])
    }

    fn advance(&mut self, events: &mut EventQueue) {
        match self.feed.recv_timeout(self.poll_timeout) {
            Ok(batch) => {
                let mut advanced = false;
                for (symbol, bar) in batch {
                    match self.index.get(&symbol) {
                        Some(&i) => {
                            // Out-of-order bars would break the no-look-ahead ordering
                            let stale = self.received[i]
                                .last()
                                .is_some_and(|prev| bar.timestamp <= prev.timestamp);
                            if stale {
                                warn!(symbol = %symbol, "dropping out-of-order bar");
                                continue;
                            }
                            self.received[i].push(bar);
                            advanced = true;
                        }
                        None => warn!(symbol = %symbol, "ignoring bar for untracked symbol"),
                    }
                }
                if advanced {
                    events.enqueue(Event::Market(MarketEvent));
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                self.continue_backtest = false;
            }
        }
    }

    fn continue_backtest(&self) -> bool {
        self.continue_backtest
    }
}
