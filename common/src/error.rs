use thiserror::Error;

use crate::event::EventKind;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Symbol not tracked by the bar source: {symbol}")]
    NotFound { symbol: String },

    #[error("No bars revealed yet for {symbol}")]
    NoData { symbol: String },

    #[error("Invalid bar field: {0}")]
    InvalidField(String),

    #[error("Handler for {expected} events received a {actual} event")]
    InvalidEvent { expected: EventKind, actual: EventKind },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Data loading error: {0}")]
    DataLoadError(String),

    #[error("Backtest aborted before completion")]
    Aborted,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<csv::Error> for BacktestError {
    fn from(err: csv::Error) -> Self {
        BacktestError::CsvError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BacktestError>;
