pub mod data;
pub mod engine;
pub mod execution;
pub mod indicators;
pub mod performance;
pub mod portfolio;
pub mod queue;
pub mod report;
pub mod strategy;

pub use data::{
    generate_bars_with_pattern, generate_synthetic_bars, load_file, BarBatch, BarSource,
    HistoricBarSource, StreamingBarSource,
};
pub use engine::{AbortHandle, Backtest, BacktestEngine, RunState, VariantOutcome};
pub use execution::{
    handler_from_config, DelayedExecutionHandler, ExecutionHandler, SimulatedExecutionHandler,
    SlippageExecutionHandler,
};
pub use performance::{drawdowns, sharpe_ratio, sortino_ratio, Drawdowns};
pub use portfolio::{NaiveSizer, Portfolio, PositionSizer, StrengthScaledSizer};
pub use queue::EventQueue;
pub use strategy::{MovingAverageCrossover, Strategy};

// Re-export common types
pub use common::{
    BacktestConfig, BacktestError, BacktestResult, Bar, BarField, BarLayout, Direction, Event,
    ExecutionConfig, ExecutionMode, FillEvent, MarketEvent, OrderEvent, OrderSide, ParamGrid,
    Result, SignalEvent, SizingConfig, StrategyParams, SummaryStatistics,
};
