use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{
    BacktestConfig, BacktestError, BacktestResult, Bar, Event, EventCounts, Result,
    StrategyParams,
};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::data::{BarSource, HistoricBarSource};
use crate::execution::{handler_from_config, ExecutionHandler};
use crate::portfolio::Portfolio;
use crate::queue::EventQueue;
use crate::report;
use crate::strategy::Strategy;

type BarSourceFactory = Box<dyn Fn() -> Result<Box<dyn BarSource>> + Send + Sync>;
type StrategyFactory =
    Box<dyn Fn(&StrategyParams, &BacktestConfig) -> Result<Box<dyn Strategy>> + Send + Sync>;
type ExecutionFactory = Box<dyn Fn(&BacktestConfig) -> Box<dyn ExecutionHandler> + Send + Sync>;

/// Lifecycle of a single variant run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Running,
    Draining,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "INIT",
            RunState::Running => "RUNNING",
            RunState::Draining => "DRAINING",
            RunState::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Cooperative cancellation shared with a running engine.
///
/// Checked between ticks only, so a tick's fills are always fully applied.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One variant's components wired around a single event queue
pub struct Backtest {
    events: EventQueue,
    bars: Box<dyn BarSource>,
    strategy: Box<dyn Strategy>,
    portfolio: Portfolio,
    execution: Box<dyn ExecutionHandler>,
    heartbeat: Duration,
    counts: EventCounts,
    state: RunState,
}

impl Backtest {
    pub fn new(
        bars: Box<dyn BarSource>,
        strategy: Box<dyn Strategy>,
        portfolio: Portfolio,
        execution: Box<dyn ExecutionHandler>,
        heartbeat: Duration,
    ) -> Self {
        Self {
            events: EventQueue::new(),
            bars,
            strategy,
            portfolio,
            execution,
            heartbeat,
            counts: EventCounts::default(),
            state: RunState::Init,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn counts(&self) -> EventCounts {
        self.counts
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn bars(&self) -> &dyn BarSource {
        self.bars.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        !self.bars.continue_backtest()
    }

    /// One heartbeat: reveal the next bars, wait, then drain the queue
    pub fn step(&mut self) -> Result<()> {
        self.state = RunState::Running;
        self.bars.advance(&mut self.events);

        if !self.heartbeat.is_zero() {
            thread::sleep(self.heartbeat);
        }

        self.state = RunState::Draining;
        while let Some(event) = self.events.try_dequeue() {
            self.dispatch(event)?;
        }
        self.state = RunState::Running;
        Ok(())
    }

    fn dispatch(&mut self, event: Event) -> Result<()> {
        match &event {
            Event::Market(_) => {
                self.counts.ticks += 1;
                let signals = self.strategy.calculate_signals(&event, self.bars.as_ref())?;
                for signal in signals {
                    self.events.enqueue(Event::Signal(signal));
                }
                self.portfolio.update_timeindex(self.bars.as_ref())?;
                self.execution.on_market(self.bars.as_ref(), &mut self.events)?;
            }
            Event::Signal(signal) => {
                self.counts.signals += 1;
                self.portfolio.update_signal(signal, &mut self.events)?;
            }
            Event::Order(order) => {
                self.counts.orders += 1;
                self.execution
                    .execute_order(order, self.bars.as_ref(), &mut self.events)?;
            }
            Event::Fill(fill) => {
                self.counts.fills += 1;
                self.portfolio.update_fill(fill, self.bars.as_ref())?;
            }
        }
        Ok(())
    }

    /// Close the run and compute its statistics
    pub fn finish(mut self, params: &StrategyParams, started: Instant) -> BacktestResult {
        self.state = RunState::Done;
        let (equity_curve, stats) = self.portfolio.summary_statistics();
        let holdings = self.portfolio.all_holdings();
        // Skip the seed record
        let start = holdings.get(1).map(|h| h.timestamp);
        let end = holdings.last().filter(|_| holdings.len() > 1).map(|h| h.timestamp);

        BacktestResult {
            params: params.clone(),
            stats,
            counts: self.counts,
            equity_curve,
            final_positions: self.portfolio.current_positions().clone(),
            start,
            end,
            initial_capital: self.portfolio.initial_capital(),
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Result of one variant in a sweep
#[derive(Debug)]
pub struct VariantOutcome {
    pub index: usize,
    pub params: StrategyParams,
    pub result: Result<BacktestResult>,
}

/// Rebuilds every component per parameter variant and runs it to completion
pub struct BacktestEngine {
    config: BacktestConfig,
    bar_source: BarSourceFactory,
    strategy: StrategyFactory,
    execution: ExecutionFactory,
    abort: AbortHandle,
}

impl BacktestEngine {
    pub fn new<B, S>(config: BacktestConfig, bar_source: B, strategy: S) -> Self
    where
        B: Fn() -> Result<Box<dyn BarSource>> + Send + Sync + 'static,
        S: Fn(&StrategyParams, &BacktestConfig) -> Result<Box<dyn Strategy>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            config,
            bar_source: Box::new(bar_source),
            strategy: Box::new(strategy),
            execution: Box::new(handler_from_config),
            abort: AbortHandle::default(),
        }
    }

    /// Replay preloaded bars; each variant gets its own copy
    pub fn historic<S>(config: BacktestConfig, data: Vec<(String, Vec<Bar>)>, strategy: S) -> Self
    where
        S: Fn(&StrategyParams, &BacktestConfig) -> Result<Box<dyn Strategy>>
            + Send
            + Sync
            + 'static,
    {
        let source = move || -> Result<Box<dyn BarSource>> {
            Ok(Box::new(HistoricBarSource::new(data.clone())?))
        };
        Self::new(config, source, strategy)
    }

    /// Replace the execution handler chosen by `config.execution`
    pub fn with_execution<E>(mut self, execution: E) -> Self
    where
        E: Fn(&BacktestConfig) -> Box<dyn ExecutionHandler> + Send + Sync + 'static,
    {
        self.execution = Box::new(execution);
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Wire fresh components for `params`
    pub fn build(&self, params: &StrategyParams) -> Result<Backtest> {
        let bars = (self.bar_source)()?;
        let strategy = (self.strategy)(params, &self.config)?;
        let portfolio = Portfolio::from_config(&self.config);
        let execution = (self.execution)(&self.config);

        Ok(Backtest::new(
            bars,
            strategy,
            portfolio,
            execution,
            Duration::from_millis(self.config.heartbeat_ms),
        ))
    }

    /// Run one variant until the bar source is exhausted
    pub fn run_variant(&self, params: &StrategyParams) -> Result<BacktestResult> {
        let started = Instant::now();
        let mut backtest = self.build(params)?;
        info!(params = ?params, "starting variant");

        while !backtest.is_finished() {
            if self.abort.is_aborted() {
                warn!(ticks = backtest.counts().ticks, "backtest aborted");
                return Err(BacktestError::Aborted);
            }
            backtest.step()?;
        }

        let result = backtest.finish(params, started);
        info!(
            ticks = result.counts.ticks,
            signals = result.counts.signals,
            orders = result.counts.orders,
            fills = result.counts.fills,
            total_return_pct = result.stats.total_return_pct,
            sharpe = result.stats.sharpe_ratio,
            "variant complete"
        );
        Ok(result)
    }

    fn run_indexed(&self, index: usize, params: &StrategyParams) -> VariantOutcome {
        let result = self.run_variant(params).and_then(|result| {
            if let Some(dir) = &self.config.output_dir {
                let path = dir.join(format!("equity_{:03}.csv", index));
                report::write_equity_csv(&path, &result.equity_curve)?;
                debug!(path = %path.display(), "equity curve written");
            }
            Ok(result)
        });

        if let Err(e) = &result {
            warn!(index, params = ?params, error = %e, "variant failed");
        }

        VariantOutcome {
            index,
            params: params.clone(),
            result,
        }
    }

    /// Run every variant; a failure is recorded and the rest still run
    pub fn sweep(&self, variants: &[StrategyParams]) -> Result<Vec<VariantOutcome>> {
        info!(
            variants = variants.len(),
            parallel = self.config.parallel,
            "starting sweep"
        );

        let outcomes: Vec<VariantOutcome> = if self.config.parallel {
            variants
                .par_iter()
                .enumerate()
                .map(|(i, params)| self.run_indexed(i, params))
                .collect()
        } else {
            variants
                .iter()
                .enumerate()
                .map(|(i, params)| self.run_indexed(i, params))
                .collect()
        };

        if let Some(dir) = &self.config.output_dir {
            write_sweep(dir, &outcomes)?;
        }

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(completed = outcomes.len() - failed, failed, "sweep finished");
        Ok(outcomes)
    }
}

fn write_sweep(dir: &Path, outcomes: &[VariantOutcome]) -> Result<()> {
    let results: Vec<&BacktestResult> = outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok())
        .collect();
    let path = dir.join("sweep.csv");
    report::write_sweep_csv(&path, &results)?;
    info!(path = %path.display(), rows = results.len(), "sweep results written");
    Ok(())
}
