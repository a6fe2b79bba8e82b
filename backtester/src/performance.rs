//! Performance statistics over a portfolio's equity history.
//!
//! Everything here is a pure function of its inputs. Degenerate inputs
//! (empty series, zero variance) produce NaN rather than panicking.

use chrono::{DateTime, Utc};
use common::{EquityRow, SummaryStatistics};

use crate::indicators::mean;

/// Drawdown series computed against a running high-water mark
#[derive(Debug, Clone, PartialEq)]
pub struct Drawdowns {
    pub high_water_mark: Vec<f64>,
    pub drawdown: Vec<f64>,
    pub duration: Vec<u64>,
    pub max_drawdown: f64,
    pub max_duration: u64,
}

/// Period-over-period percentage change; the first period is 0
pub fn returns(totals: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(totals.len());
    if totals.is_empty() {
        return out;
    }
    out.push(0.0);
    out.extend(totals.windows(2).map(|w| {
        let prev = w[0];
        if prev != 0.0 {
            (w[1] - prev) / prev
        } else {
            0.0
        }
    }));
    out
}

/// Compound returns into a curve starting at 1.0
pub fn equity_curve(returns: &[f64]) -> Vec<f64> {
    returns
        .iter()
        .scan(1.0, |acc, r| {
            *acc *= 1.0 + r;
            Some(*acc)
        })
        .collect()
}

fn population_std(values: &[f64]) -> f64 {
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Annualized Sharpe ratio against a zero benchmark.
///
/// Uses the population standard deviation. NaN when `returns` is empty or
/// has zero variance.
pub fn sharpe_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.is_empty() {
        return f64::NAN;
    }
    let std = population_std(returns);
    if std == 0.0 || !std.is_finite() {
        return f64::NAN;
    }
    periods_per_year.sqrt() * mean(returns) / std
}

/// Annualized Sortino ratio; downside deviation is taken over all periods
pub fn sortino_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.is_empty() {
        return f64::NAN;
    }
    let downside_variance = returns
        .iter()
        .filter(|&&r| r < 0.0)
        .map(|r| r.powi(2))
        .sum::<f64>()
        / returns.len() as f64;
    let downside = downside_variance.sqrt();
    if downside == 0.0 {
        return f64::NAN;
    }
    periods_per_year.sqrt() * mean(returns) / downside
}

/// Drawdowns against a high-water mark that starts at zero.
///
/// `duration[t]` counts consecutive periods below the high-water mark and
/// resets to 0 whenever a new high (or a tie) is reached.
pub fn drawdowns(equity: &[f64]) -> Drawdowns {
    let n = equity.len();
    let mut high_water_mark = Vec::with_capacity(n);
    let mut drawdown = Vec::with_capacity(n);
    let mut duration = Vec::with_capacity(n);

    let mut hwm = 0.0_f64;
    let mut run = 0u64;
    for &value in equity {
        hwm = hwm.max(value);
        let dd = hwm - value;
        run = if dd == 0.0 { 0 } else { run + 1 };

        high_water_mark.push(hwm);
        drawdown.push(dd);
        duration.push(run);
    }

    let max_drawdown = drawdown.iter().copied().fold(0.0, f64::max);
    let max_duration = duration.iter().copied().max().unwrap_or(0);

    Drawdowns {
        high_water_mark,
        drawdown,
        duration,
        max_drawdown,
        max_duration,
    }
}

/// Compound annual growth rate of a normalized equity curve
pub fn cagr(final_equity: f64, periods: usize, periods_per_year: f64) -> f64 {
    if periods == 0 || periods_per_year <= 0.0 {
        return f64::NAN;
    }
    if final_equity <= 0.0 {
        return -1.0;
    }
    let years = periods as f64 / periods_per_year;
    final_equity.powf(1.0 / years) - 1.0
}

/// Build the equity report rows and headline statistics from a total series
pub fn summarize(
    timestamps: &[DateTime<Utc>],
    totals: &[f64],
    periods_per_year: f64,
) -> (Vec<EquityRow>, SummaryStatistics) {
    let returns = returns(totals);
    let curve = equity_curve(&returns);
    let dd = drawdowns(&curve);

    let rows = timestamps
        .iter()
        .zip(totals)
        .zip(returns.iter().zip(&curve))
        .zip(&dd.drawdown)
        .map(|(((datetime, total), (ret, eq)), drawdown)| EquityRow {
            datetime: *datetime,
            total: *total,
            returns: *ret,
            equity_curve: *eq,
            drawdown: *drawdown,
        })
        .collect();

    // The seed record has no prior period
    let period_returns = returns.get(1..).unwrap_or(&[]);
    let final_curve = curve.last().copied().unwrap_or(1.0);

    let stats = SummaryStatistics {
        total_return_pct: (final_curve - 1.0) * 100.0,
        cagr_pct: cagr(final_curve, period_returns.len(), periods_per_year) * 100.0,
        sharpe_ratio: sharpe_ratio(period_returns, periods_per_year),
        sortino_ratio: sortino_ratio(period_returns, periods_per_year),
        max_drawdown_pct: dd.max_drawdown * 100.0,
        max_drawdown_duration: dd.max_duration,
        final_equity: totals.last().copied().unwrap_or(0.0),
    };

    (rows, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_sharpe_constant_returns_is_nan() {
        assert!(sharpe_ratio(&[0.01, 0.01, 0.01, 0.01], 252.0).is_nan());
        assert!(sharpe_ratio(&[], 252.0).is_nan());
    }

    #[test]
    fn test_sharpe_known_value() {
        // mean 0.01, population std 0.01
        let returns = [0.0, 0.02, 0.0, 0.02];
        assert_relative_eq!(sharpe_ratio(&returns, 252.0), 252.0_f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_sortino_ignores_upside() {
        assert!(sortino_ratio(&[0.01, 0.02], 252.0).is_nan());
        let ratio = sortino_ratio(&[0.02, -0.01], 252.0);
        // mean 0.005, downside sqrt(0.0001 / 2)
        assert_relative_eq!(
            ratio,
            252.0_f64.sqrt() * 0.005 / (0.0001_f64 / 2.0).sqrt(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_drawdowns_against_running_peak() {
        let dd = drawdowns(&[1.0, 1.1, 0.9, 1.2, 1.0]);

        assert_eq!(dd.high_water_mark, vec![1.0, 1.1, 1.1, 1.2, 1.2]);
        assert_relative_eq!(dd.drawdown[2], 0.2, epsilon = 1e-12);
        assert_relative_eq!(dd.drawdown[4], 0.2, epsilon = 1e-12);
        assert_relative_eq!(dd.max_drawdown, 0.2, epsilon = 1e-12);
        assert_eq!(dd.duration, vec![0, 0, 1, 0, 1]);
        assert_eq!(dd.max_duration, 1);
    }

    #[test]
    fn test_high_water_mark_is_monotone() {
        let equity = [1.0, 0.8, 1.3, 0.7, 0.9, 1.5, 1.4, 1.4, 1.6];
        let dd = drawdowns(&equity);

        assert!(dd.high_water_mark.windows(2).all(|w| w[1] >= w[0]));
        assert!(dd.drawdown.iter().all(|d| *d >= 0.0));
        assert_eq!(dd.duration, vec![0, 1, 0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_drawdowns_empty() {
        let dd = drawdowns(&[]);
        assert_eq!(dd.max_drawdown, 0.0);
        assert_eq!(dd.max_duration, 0);
    }

    #[test]
    fn test_returns_and_curve() {
        let r = returns(&[100.0, 110.0, 99.0]);
        assert_eq!(r[0], 0.0);
        assert_relative_eq!(r[1], 0.1, epsilon = 1e-12);
        assert_relative_eq!(r[2], -0.1, epsilon = 1e-12);

        let curve = equity_curve(&r);
        assert_relative_eq!(curve[2], 0.99, epsilon = 1e-12);
    }

    #[test]
    fn test_cagr() {
        assert_relative_eq!(cagr(1.21, 504, 252.0), 0.1, epsilon = 1e-9);
        assert!(cagr(1.0, 0, 252.0).is_nan());
        assert_eq!(cagr(0.0, 10, 252.0), -1.0);
    }

    #[test]
    fn test_summarize_flat_history() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let timestamps: Vec<_> = (0..4).map(|i| start + Duration::days(i)).collect();
        let (rows, stats) = summarize(&timestamps, &[1000.0; 4], 252.0);

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3].equity_curve, 1.0);
        assert_eq!(stats.total_return_pct, 0.0);
        assert!(stats.sharpe_ratio.is_nan());
        assert_eq!(stats.max_drawdown_duration, 0);
        assert_eq!(stats.final_equity, 1000.0);
    }
}
