pub mod config;
pub mod error;
pub mod event;
pub mod types;

pub use config::{
    BacktestConfig, ExecutionConfig, ExecutionMode, ParamGrid, SizingConfig, StrategyParams,
};
pub use error::{BacktestError, Result};
pub use event::{tiered_commission, Event, EventKind, FillEvent, MarketEvent, OrderEvent, SignalEvent};
pub use types::*;
