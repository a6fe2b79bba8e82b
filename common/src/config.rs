use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BacktestError, Result};
use crate::types::{BarField, BarLayout};

/// Bars per year for intraday minute data (252 days x 6.5 hours x 60 minutes)
pub const MINUTE_PERIODS_PER_YEAR: f64 = 252.0 * 6.5 * 60.0;

/// Which execution handler a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Immediate full fill priced by the portfolio
    #[default]
    Simulated,
    /// Fill released after `latency_ticks` market events
    Delayed,
    /// Random slippage and volume-limited partial fills
    Slippage,
}

/// Execution simulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    /// Venue reported on fills
    pub venue: String,

    // === Latency Simulation ===
    /// Number of ticks between order and fill (0 = same tick)
    pub latency_ticks: usize,

    // === Slippage Settings ===
    /// Minimum slippage (can be negative for favorable fills)
    pub slippage_min_pct: f64,
    /// Maximum slippage (typically positive, unfavorable)
    pub slippage_max_pct: f64,
    /// Probability of unfavorable slippage (0.0 - 1.0)
    pub slippage_adverse_probability: f64,

    // === Volume Constraints ===
    /// Maximum percentage of bar volume that can be filled
    pub volume_participation_max_pct: f64,
    /// Fill what volume allows instead of dropping the order
    pub partial_fill_enabled: bool,

    /// Seed for the slippage RNG so sweeps stay reproducible
    pub seed: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Simulated,
            venue: "ARCA".to_string(),

            latency_ticks: 0,

            // Slippage: -0.1% to +0.2%, 70% chance of adverse
            slippage_min_pct: -0.001,
            slippage_max_pct: 0.002,
            slippage_adverse_probability: 0.7,

            // Volume: max 2% of bar volume per order
            volume_participation_max_pct: 0.02,
            partial_fill_enabled: true,

            seed: 42,
        }
    }
}

impl ExecutionConfig {
    /// Fills arrive `ticks` market events after the order
    pub fn delayed(ticks: usize) -> Self {
        Self {
            mode: ExecutionMode::Delayed,
            latency_ticks: ticks,
            ..Default::default()
        }
    }

    /// Preset for slippage and partial fill simulation
    pub fn slippage() -> Self {
        Self {
            mode: ExecutionMode::Slippage,
            ..Default::default()
        }
    }
}

/// Position sizing policy applied to signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SizingConfig {
    /// Fixed quantity per entry
    Naive { quantity: u64 },
    /// Entry quantity scaled by signal strength
    StrengthScaled { base_quantity: u64 },
}

impl Default for SizingConfig {
    fn default() -> Self {
        SizingConfig::Naive { quantity: 100 }
    }
}

/// Run-level configuration shared by every parameter variant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub symbols: Vec<String>,
    pub initial_capital: f64,
    /// Pause between heartbeats; 0 for plain historical replay
    pub heartbeat_ms: u64,
    /// Timestamp of the seed positions/holdings records
    pub start_date: DateTime<Utc>,
    /// Directory containing one `<SYMBOL>.csv` per symbol
    pub data_dir: Option<PathBuf>,
    pub bar_layout: BarLayout,
    /// Bar field used to mark positions and price fills
    pub price_field: BarField,
    pub periods_per_year: f64,
    pub sizing: SizingConfig,
    pub execution: ExecutionConfig,
    /// Destination for equity and sweep reports
    pub output_dir: Option<PathBuf>,
    /// Run sweep variants on the rayon pool
    pub parallel: bool,
    /// Strategy parameter variants to sweep
    pub variants: Vec<StrategyParams>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["AAPL".to_string()],
            initial_capital: 100_000.0,
            heartbeat_ms: 0,
            start_date: Utc
                .with_ymd_and_hms(1990, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            data_dir: None,
            bar_layout: BarLayout::Daily,
            price_field: BarField::AdjClose,
            periods_per_year: 252.0,
            sizing: SizingConfig::default(),
            execution: ExecutionConfig::default(),
            output_dir: None,
            parallel: false,
            variants: Vec::new(),
        }
    }
}

impl BacktestConfig {
    /// Minute-bar preset: intraday CSV layout, marked at raw close
    pub fn intraday() -> Self {
        Self::default().with_intraday_bars()
    }

    /// Switch to minute bars priced on `Close`, keeping everything else
    pub fn with_intraday_bars(mut self) -> Self {
        self.bar_layout = BarLayout::Intraday;
        self.price_field = BarField::Close;
        self.periods_per_year = MINUTE_PERIODS_PER_YEAR;
        self
    }

    /// Load from a JSON file; missing keys fall back to defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            BacktestError::DataLoadError(format!("{}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(BacktestError::InvalidParameter(
                "at least one symbol is required".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for symbol in &self.symbols {
            if !seen.insert(symbol) {
                return Err(BacktestError::InvalidParameter(format!(
                    "duplicate symbol {}",
                    symbol
                )));
            }
        }
        if !(self.initial_capital > 0.0) {
            return Err(BacktestError::InvalidParameter(format!(
                "initial capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if !(self.periods_per_year > 0.0) {
            return Err(BacktestError::InvalidParameter(format!(
                "periods per year must be positive, got {}",
                self.periods_per_year
            )));
        }
        Ok(())
    }

    pub fn with_symbols<S: Into<String>>(mut self, symbols: impl IntoIterator<Item = S>) -> Self {
        self.symbols = symbols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capital(mut self, capital: f64) -> Self {
        self.initial_capital = capital;
        self
    }

    pub fn with_heartbeat_ms(mut self, heartbeat_ms: u64) -> Self {
        self.heartbeat_ms = heartbeat_ms;
        self
    }

    pub fn with_start_date(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = start_date;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_price_field(mut self, field: BarField) -> Self {
        self.price_field = field;
        self
    }

    pub fn with_sizing(mut self, sizing: SizingConfig) -> Self {
        self.sizing = sizing;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_variants(mut self, variants: Vec<StrategyParams>) -> Self {
        self.variants = variants;
        self
    }
}

/// Immutable set of named strategy parameters for one variant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyParams(BTreeMap<String, f64>);

impl StrategyParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (S, f64)>) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn get_or(&self, name: &str, default: f64) -> f64 {
        self.get(name).unwrap_or(default)
    }

    /// Parameter as a window length; must be a positive whole number
    pub fn window_or(&self, name: &str, default: usize) -> Result<usize> {
        match self.get(name) {
            None => Ok(default),
            Some(v) if v >= 1.0 && v.fract() == 0.0 => Ok(v as usize),
            Some(v) => Err(BacktestError::InvalidParameter(format!(
                "{} must be a positive integer, got {}",
                name, v
            ))),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Cartesian grid of strategy parameter values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamGrid {
    axes: Vec<(String, Vec<f64>)>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn axis(mut self, name: impl Into<String>, values: impl IntoIterator<Item = f64>) -> Self {
        self.axes.push((name.into(), values.into_iter().collect()));
        self
    }

    /// Number of variants in the grid
    pub fn size(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes.iter().map(|(_, values)| values.len()).product()
    }

    /// All combinations, first axis varying slowest
    pub fn variants(&self) -> Vec<StrategyParams> {
        if self.axes.is_empty() {
            return vec![];
        }

        let mut variants = vec![StrategyParams::new()];
        for (name, values) in &self.axes {
            let mut next = Vec::with_capacity(variants.len() * values.len());
            for params in &variants {
                for &value in values {
                    next.push(params.clone().with(name.clone(), value));
                }
            }
            variants = next;
        }
        variants
    }
}
