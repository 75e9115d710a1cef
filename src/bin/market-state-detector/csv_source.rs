//! CSV price files and a directory-backed benchmark fetcher

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use market_state_detector::prelude::*;

/// Header names of the OHLC columns
#[derive(Debug, Clone)]
pub struct Columns {
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
}

impl Default for Columns {
    fn default() -> Self {
        Self {
            open: "open".to_string(),
            high: "high".to_string(),
            low: "low".to_string(),
            close: "close".to_string(),
        }
    }
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
        .ok_or_else(|| anyhow!("required column '{name}' not found in CSV"))
}

/// Load an oldest-first OHLC series from a CSV file with a header row
pub fn load_series(path: &Path, columns: &Columns) -> Result<PriceSeries> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let idx = [
        column_index(&headers, &columns.open)?,
        column_index(&headers, &columns.high)?,
        column_index(&headers, &columns.low)?,
        column_index(&headers, &columns.close)?,
    ];

    let mut cols: [Vec<f64>; 4] = Default::default();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("{}: bad CSV row {}", path.display(), row + 1))?;
        for (col, &i) in cols.iter_mut().zip(idx.iter()) {
            let raw = record.get(i).unwrap_or_default().trim();
            let value: f64 = raw.parse().with_context(|| {
                format!("{}: row {}: cannot parse '{raw}' as a price", path.display(), row + 1)
            })?;
            col.push(value);
        }
    }

    let [opens, highs, lows, closes] = cols;
    PriceSeries::from_columns(&opens, &highs, &lows, &closes)
        .with_context(|| format!("invalid price data in {}", path.display()))
}

/// Reads benchmark series from `<dir>/<ID>.csv`
#[derive(Debug, Clone)]
pub struct CsvDirectoryFetcher {
    dir: PathBuf,
    columns: Columns,
}

impl CsvDirectoryFetcher {
    pub fn new(dir: impl Into<PathBuf>, columns: Columns) -> Self {
        Self {
            dir: dir.into(),
            columns,
        }
    }
}

impl BenchmarkFetcher for CsvDirectoryFetcher {
    fn fetch(&self, benchmark: &str, bars: usize) -> std::result::Result<PriceSeries, FetchError> {
        let path = self.dir.join(format!("{benchmark}.csv"));
        if !path.is_file() {
            return Err(FetchError::NotFound(benchmark.to_string()));
        }
        let series = load_series(&path, &self.columns)
            .map_err(|e| FetchError::Source(format!("{e:#}")))?;
        Ok(series.tail(bars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_csv(dir: &Path, name: &str, header: &str, rows: usize) -> PathBuf {
        let mut text = format!("{header}\n");
        for i in 0..rows {
            text.push_str(&format!("2024-01-{:02},100,101,99,100\n", i + 1));
        }
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_load_series_default_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "prices.csv", "date,Open,High,Low,Close", 25);
        let series = load_series(&path, &Columns::default()).unwrap();
        assert_eq!(series.len(), 25);
        assert_eq!(series.last().unwrap().close, 100.0);
    }

    #[test]
    fn test_custom_column_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "prices.csv", "day,o,h,l,c", 3);
        let columns = Columns {
            open: "o".into(),
            high: "h".into(),
            low: "l".into(),
            close: "c".into(),
        };
        assert_eq!(load_series(&path, &columns).unwrap().len(), 3);

        let err = load_series(&path, &Columns::default()).unwrap_err();
        assert!(err.to_string().contains("required column 'open'"));
    }

    #[test]
    fn test_unparseable_price() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "open,high,low,close\n100,101,99,n/a\n").unwrap();
        let err = load_series(&path, &Columns::default()).unwrap_err();
        assert!(format!("{err:#}").contains("cannot parse 'n/a'"));
    }

    #[test]
    fn test_directory_fetcher() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "SPY.csv", "date,open,high,low,close", 30);
        let fetcher = CsvDirectoryFetcher::new(dir.path(), Columns::default());

        assert_eq!(fetcher.fetch("SPY", 25).unwrap().len(), 25);
        assert_eq!(
            fetcher.fetch("QQQ", 25).unwrap_err(),
            FetchError::NotFound("QQQ".to_string())
        );
    }
}
