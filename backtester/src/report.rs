//! CSV artifacts written after a run or sweep.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use common::{BacktestResult, EquityRow, Result};

const STAT_COLUMNS: [&str; 5] = [
    "total_return_pct",
    "cagr_pct",
    "sharpe_ratio",
    "max_drawdown_pct",
    "max_drawdown_duration",
];

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Equity report: `datetime,total,returns,equity_curve,drawdown`
pub fn write_equity_csv(path: &Path, rows: &[EquityRow]) -> Result<()> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["datetime", "total", "returns", "equity_curve", "drawdown"])?;
    for row in rows {
        writer.write_record([
            row.datetime.to_rfc3339(),
            row.total.to_string(),
            row.returns.to_string(),
            row.equity_curve.to_string(),
            row.drawdown.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// One row per variant: parameter values followed by headline statistics.
///
/// Parameter columns are the sorted union of every variant's names; a
/// variant missing one leaves the cell empty.
pub fn write_sweep_csv(path: &Path, results: &[&BacktestResult]) -> Result<()> {
    let names: BTreeSet<&str> = results.iter().flat_map(|r| r.params.names()).collect();

    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(names.iter().copied().chain(STAT_COLUMNS))?;

    for result in results {
        let stats = &result.stats;
        let mut record: Vec<String> = names
            .iter()
            .map(|name| {
                result
                    .params
                    .get(name)
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            })
            .collect();
        record.extend([
            format!("{:.4}", stats.total_return_pct),
            format!("{:.4}", stats.cagr_pct),
            format!("{:.4}", stats.sharpe_ratio),
            format!("{:.4}", stats.max_drawdown_pct),
            stats.max_drawdown_duration.to_string(),
        ]);
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
