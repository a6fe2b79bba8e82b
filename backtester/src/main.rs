use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use event_backtester::{
    generate_synthetic_bars, BacktestConfig, BacktestEngine, BacktestResult, BarSource,
    ExecutionMode, HistoricBarSource, MovingAverageCrossover, ParamGrid,
    Strategy, StrategyParams, VariantOutcome,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExecutionArg {
    Simulated,
    Delayed,
    Slippage,
}

impl From<ExecutionArg> for ExecutionMode {
    fn from(arg: ExecutionArg) -> Self {
        match arg {
            ExecutionArg::Simulated => ExecutionMode::Simulated,
            ExecutionArg::Delayed => ExecutionMode::Delayed,
            ExecutionArg::Slippage => ExecutionMode::Slippage,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "event-backtester")]
#[command(version = "0.1.0")]
#[command(about = "Event-driven backtester with moving average crossover sweeps", long_about = None)]
struct Args {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory with one <SYMBOL>.csv per symbol. If not provided, uses synthetic data.
    #[arg(short = 'd', long)]
    data_dir: Option<PathBuf>,

    /// Symbols to trade, comma separated
    #[arg(short, long, value_delimiter = ',')]
    symbols: Option<Vec<String>>,

    /// Initial capital
    #[arg(short, long)]
    capital: Option<f64>,

    /// Pause between ticks in milliseconds
    #[arg(long)]
    heartbeat_ms: Option<u64>,

    /// Read minute bars (open, low, high, close, volume, open_interest)
    #[arg(long)]
    intraday: bool,

    /// Number of synthetic bars per symbol
    #[arg(long, default_value = "1000")]
    days: usize,

    /// Initial price for synthetic data
    #[arg(long, default_value = "100.0")]
    initial_price: f64,

    /// Seed for synthetic data
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Short window values to sweep, comma separated
    #[arg(long, value_delimiter = ',')]
    short_windows: Vec<f64>,

    /// Long window values to sweep, comma separated
    #[arg(long, value_delimiter = ',')]
    long_windows: Vec<f64>,

    /// Execution handler
    #[arg(short, long, value_enum)]
    execution: Option<ExecutionArg>,

    /// Ticks between order and fill for delayed execution
    #[arg(long)]
    latency: Option<usize>,

    /// Directory for equity and sweep CSV reports
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Output format (json, text)
    #[arg(short, long, default_value = "text")]
    output: String,

    /// Pretty print JSON output
    #[arg(long)]
    pretty: bool,

    /// Run variants in parallel
    #[arg(long)]
    parallel: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Serialize)]
struct VariantReport<'a> {
    index: usize,
    params: &'a StrategyParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a BacktestResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn init_logging(verbose: u8) -> Result<()> {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global default subscriber")?;
    Ok(())
}

fn build_config(args: &Args) -> Result<BacktestConfig> {
    let mut config = match &args.config {
        Some(path) => BacktestConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => BacktestConfig::default(),
    };

    if args.intraday {
        config = config.with_intraday_bars();
    }

    if let Some(symbols) = &args.symbols {
        config = config.with_symbols(symbols.iter().cloned());
    }
    if let Some(capital) = args.capital {
        config = config.with_capital(capital);
    }
    if let Some(heartbeat_ms) = args.heartbeat_ms {
        config = config.with_heartbeat_ms(heartbeat_ms);
    }
    if let Some(dir) = &args.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(mode) = args.execution {
        config.execution.mode = mode.into();
    }
    if let Some(latency) = args.latency {
        config.execution.latency_ticks = latency;
    }
    if let Some(dir) = &args.output_dir {
        config = config.with_output_dir(dir);
    }
    if args.parallel {
        config = config.parallel(true);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn build_variants(args: &Args, config: &BacktestConfig) -> Vec<StrategyParams> {
    if !args.short_windows.is_empty() || !args.long_windows.is_empty() {
        let mut grid = ParamGrid::new();
        if !args.short_windows.is_empty() {
            grid = grid.axis("short_window", args.short_windows.iter().copied());
        }
        if !args.long_windows.is_empty() {
            grid = grid.axis("long_window", args.long_windows.iter().copied());
        }
        return grid.variants();
    }
    if !config.variants.is_empty() {
        return config.variants.clone();
    }
    vec![StrategyParams::new()]
}

fn crossover(
    params: &StrategyParams,
    config: &BacktestConfig,
) -> event_backtester::Result<Box<dyn Strategy>> {
    Ok(Box::new(MovingAverageCrossover::from_params(
        &config.symbols,
        params,
        config.price_field,
    )?))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let config = build_config(&args)?;
    let variants = build_variants(&args, &config);

    let engine = match config.data_dir.clone() {
        Some(dir) => {
            info!(dir = %dir.display(), symbols = ?config.symbols, "replaying CSV bars");
            let symbols = config.symbols.clone();
            let layout = config.bar_layout;
            let source = move || -> event_backtester::Result<Box<dyn BarSource>> {
                Ok(Box::new(HistoricBarSource::from_dir(&dir, &symbols, layout)?))
            };
            BacktestEngine::new(config, source, crossover)
        }
        None => {
            info!(
                days = args.days,
                initial_price = args.initial_price,
                "generating synthetic bars"
            );
            let data = config
                .symbols
                .iter()
                .enumerate()
                .map(|(i, symbol)| {
                    let bars =
                        generate_synthetic_bars(args.days, args.initial_price, args.seed + i as u64);
                    (symbol.clone(), bars)
                })
                .collect();
            BacktestEngine::historic(config, data, crossover)
        }
    };

    let outcomes = engine.sweep(&variants).context("Sweep failed")?;

    match args.output.as_str() {
        "json" => print_json_report(&outcomes, args.pretty)?,
        "text" => print_text_report(&outcomes),
        _ => {
            eprintln!("Unknown output format: {}. Using text.", args.output);
            print_text_report(&outcomes);
        }
    }

    if outcomes.iter().all(|o| o.result.is_err()) {
        bail!("all {} variants failed", outcomes.len());
    }
    Ok(())
}

fn print_json_report(outcomes: &[VariantOutcome], pretty: bool) -> Result<()> {
    let reports: Vec<VariantReport> = outcomes
        .iter()
        .map(|o| VariantReport {
            index: o.index,
            params: &o.params,
            result: o.result.as_ref().ok(),
            error: o.result.as_ref().err().map(|e| e.to_string()),
        })
        .collect();

    let json = if pretty {
        serde_json::to_string_pretty(&reports)?
    } else {
        serde_json::to_string(&reports)?
    };
    println!("{}", json);
    Ok(())
}

fn format_params(params: &StrategyParams) -> String {
    if params.is_empty() {
        return "defaults".to_string();
    }
    params
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_text_report(outcomes: &[VariantOutcome]) {
    println!();
    println!("================================================================");
    println!("  BACKTEST REPORT - Moving Average Crossover");
    println!("================================================================");

    for outcome in outcomes {
        println!();
        println!("----------------------------------------------------------------");
        println!("  VARIANT {}: {}", outcome.index, format_params(&outcome.params));
        println!("----------------------------------------------------------------");

        let result = match &outcome.result {
            Ok(result) => result,
            Err(e) => {
                println!("  FAILED: {}", e);
                continue;
            }
        };
        let stats = &result.stats;

        if let (Some(start), Some(end)) = (result.start, result.end) {
            println!("  Period: {} to {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"));
        }
        println!("  Execution Time:   {:>12}ms", result.execution_time_ms);
        println!("  Initial Capital:  ${:>12.2}", result.initial_capital);
        println!("  Final Equity:     ${:>12.2}", stats.final_equity);
        println!("  Total Return:     {:>12.2}%", stats.total_return_pct);
        println!("  CAGR:             {:>12.2}%", stats.cagr_pct);
        println!("  Sharpe Ratio:     {:>12.3}", stats.sharpe_ratio);
        println!("  Sortino Ratio:    {:>12.3}", stats.sortino_ratio);
        println!("  Max Drawdown:     {:>12.2}%", stats.max_drawdown_pct);
        println!("  Max DD Duration:  {:>12} bars", stats.max_drawdown_duration);
        println!(
            "  Events:           {} ticks, {} signals, {} orders, {} fills",
            result.counts.ticks, result.counts.signals, result.counts.orders, result.counts.fills
        );
        for (symbol, quantity) in &result.final_positions {
            println!("  Position {:<8} {:>12}", symbol, quantity);
        }
    }

    println!();
    println!("================================================================");
}
