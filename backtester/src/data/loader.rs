use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use common::{BacktestError, Bar, BarLayout, Result};
use tracing::debug;

/// Load bars from CSV file.
///
/// The first column is the time index; the remaining columns follow
/// `layout`. Rows are returned sorted by timestamp.
pub fn load_csv(path: &Path, layout: BarLayout) -> Result<Vec<Bar>> {
    let file = File::open(path)
        .map_err(|e| BacktestError::DataLoadError(format!("{}: {}", path.display(), e)))?;
    let reader = BufReader::new(file);
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut bars = Vec::new();

    for result in csv_reader.records() {
        let record = result?;

        if record.len() < 6 {
            continue;
        }

        let timestamp = parse_timestamp(&record[0])?;
        let open = parse_price(&record[1], "open")?;
        let close = parse_price(&record[4], "close")?;
        let volume = parse_price(&record[5], "volume")?;
        let extra = if record.len() > 6 && !record[6].is_empty() {
            Some(parse_price(&record[6], "column 7")?)
        } else {
            None
        };

        let bar = match layout {
            // datetime, open, high, low, close, volume, adj_close
            BarLayout::Daily => Bar {
                timestamp,
                open,
                high: parse_price(&record[2], "high")?,
                low: parse_price(&record[3], "low")?,
                close,
                volume,
                adj_close: extra.unwrap_or(close),
                open_interest: None,
            },
            // datetime, open, low, high, close, volume, open_interest
            BarLayout::Intraday => Bar {
                timestamp,
                open,
                high: parse_price(&record[3], "high")?,
                low: parse_price(&record[2], "low")?,
                close,
                volume,
                adj_close: close,
                open_interest: extra,
            },
        };
        bars.push(bar);
    }

    bars.sort_by_key(|b| b.timestamp);
    debug!(path = %path.display(), bars = bars.len(), "loaded csv");
    Ok(bars)
}

/// Load bars from JSON file
pub fn load_json(path: &Path) -> Result<Vec<Bar>> {
    let file = File::open(path)
        .map_err(|e| BacktestError::DataLoadError(format!("{}: {}", path.display(), e)))?;
    let reader = BufReader::new(file);
    let mut bars: Vec<Bar> = serde_json::from_reader(reader)?;
    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

fn parse_price(s: &str, column: &str) -> Result<f64> {
    s.parse()
        .map_err(|_| BacktestError::CsvError(format!("Invalid {} value: {:?}", column, s)))
}

/// Parse timestamp from various formats
pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    // Try ISO 8601 format first
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Try common formats
    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
    ];
    for fmt in &datetime_formats {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    let date_formats = ["%Y-%m-%d", "%Y/%m/%d"];
    for fmt in &date_formats {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(s, fmt) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(Utc.from_utc_datetime(&dt));
            }
        }
    }

    // Try Unix timestamp (seconds)
    if let Ok(ts) = s.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp(ts, 0) {
            return Ok(dt);
        }
    }

    Err(BacktestError::CsvError(format!(
        "Unable to parse timestamp: {}",
        s
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use std::io::Write;

    #[test]
    fn test_parse_timestamp_iso() {
        let ts = parse_timestamp("2024-01-15T09:30:00Z").unwrap();
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.month(), 1);
        assert_eq!(ts.day(), 15);
    }

    #[test]
    fn test_parse_timestamp_common() {
        let ts = parse_timestamp("2007-11-08 10:41:00").unwrap();
        assert_eq!(ts.year(), 2007);
        assert_eq!(ts.minute(), 41);
    }

    #[test]
    fn test_parse_timestamp_date_only() {
        let ts = parse_timestamp("2024-01-15").unwrap();
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.hour(), 0);
    }

    #[test]
    fn test_parse_timestamp_invalid() {
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_load_daily_csv_sorts_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "datetime,open,high,low,close,volume,adj_close").unwrap();
        writeln!(file, "2024-01-03,11,12,10,11.5,2000,11.4").unwrap();
        writeln!(file, "2024-01-02,10,11,9,10.5,1000,10.4").unwrap();

        let bars = load_csv(file.path(), BarLayout::Daily).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp.day(), 2);
        assert_eq!(bars[0].high, 11.0);
        assert_eq!(bars[0].low, 9.0);
        assert_eq!(bars[1].adj_close, 11.4);
    }

    #[test]
    fn test_load_intraday_csv_column_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "datetime,open,low,high,close,volume,oi").unwrap();
        writeln!(file, "2007-11-08 10:41:00,20.0,19.5,20.5,20.2,300,7").unwrap();

        let bars = load_csv(file.path(), BarLayout::Intraday).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].low, 19.5);
        assert_eq!(bars[0].high, 20.5);
        assert_eq!(bars[0].adj_close, 20.2);
        assert_eq!(bars[0].open_interest, Some(7.0));
    }

    #[test]
    fn test_load_csv_bad_price() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "datetime,open,high,low,close,volume,adj_close").unwrap();
        writeln!(file, "2024-01-02,abc,11,9,10.5,1000,10.4").unwrap();

        assert!(matches!(
            load_csv(file.path(), BarLayout::Daily),
            Err(BacktestError::CsvError(_))
        ));
    }
}
