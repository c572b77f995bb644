//! Bar data: OHLCV bars and cached per-symbol-per-day files.
//!
//! Bars are immutable once built and must carry strictly increasing
//! timestamps per symbol. The cached file format is zstd-compressed CSV,
//! one file per symbol per session day: `{SYMBOL}-{YYYYMMDD}.bars.csv.zst`.
//! A missing cache file is a hard data error for that symbol, never an
//! empty/flat session.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::errors::PipelineError;

/// A single OHLCV bar.
///
/// `buy_volume`/`sell_volume` are present only when the feed provided
/// trade-side classification; the CVD estimator falls back to an OHLCV
/// proxy when they are absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    #[serde(default)]
    pub buy_volume: Option<u64>,
    #[serde(default)]
    pub sell_volume: Option<u64>,
}

impl Bar {
    /// Signed candle body; positive for a green bar.
    pub fn body(&self) -> f64 {
        self.close - self.open
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Ordered bar sequence for one symbol's session.
#[derive(Debug, Clone)]
pub struct SessionBars {
    pub symbol: String,
    bars: Vec<Bar>,
}

impl SessionBars {
    /// Build a session series, validating timestamp ordering.
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> Result<Self, PipelineError> {
        let symbol = symbol.into();
        if bars.is_empty() {
            return Err(PipelineError::Data {
                symbol,
                detail: "empty bar history".to_string(),
            });
        }
        for pair in bars.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(PipelineError::Data {
                    symbol,
                    detail: format!(
                        "non-increasing timestamps: {} then {}",
                        pair[0].timestamp, pair[1].timestamp
                    ),
                });
            }
        }
        Ok(Self { symbol, bars })
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Interval between consecutive bars in seconds, from the first pair.
    /// Falls back to 60s for a single-bar session.
    pub fn bar_interval_secs(&self) -> i64 {
        match self.bars.windows(2).next() {
            Some(pair) => (pair[1].timestamp - pair[0].timestamp).num_seconds().max(1),
            None => 60,
        }
    }
}

/// CSV row shape for cached bar files.
#[derive(Debug, Deserialize)]
struct CsvBar {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
    buy_volume: Option<u64>,
    sell_volume: Option<u64>,
}

/// Load one symbol's cached session bars for a date (YYYYMMDD).
pub fn load_session_bars(
    data_dir: &Path,
    symbol: &str,
    date: &str,
) -> Result<SessionBars, PipelineError> {
    let path = data_dir.join(format!("{}-{}.bars.csv.zst", symbol, date));

    if !path.exists() {
        return Err(PipelineError::Data {
            symbol: symbol.to_string(),
            detail: format!("missing cached bar file {:?}", path),
        });
    }

    let bars = read_bar_csv(&path).map_err(|e| PipelineError::Data {
        symbol: symbol.to_string(),
        detail: format!("{:#}", e),
    })?;

    SessionBars::new(symbol, bars)
}

fn read_bar_csv(path: &Path) -> anyhow::Result<Vec<Bar>> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let decoder = zstd::stream::Decoder::new(file)
        .with_context(|| format!("failed to create zstd decoder for {:?}", path))?;
    let reader = BufReader::new(decoder);
    let mut csv_reader = csv::Reader::from_reader(reader);

    let mut bars = Vec::new();
    for result in csv_reader.deserialize() {
        let row: CsvBar = result.with_context(|| "failed to parse CSV row")?;
        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .with_context(|| format!("failed to parse timestamp: {}", row.timestamp))?
            .with_timezone(&Utc);
        bars.push(Bar {
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            buy_volume: row.buy_volume,
            sell_volume: row.sell_volume,
        });
    }
    Ok(bars)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;

    /// Build a bar N minutes after 09:30 ET (14:30 UTC) with the given OHLCV.
    pub fn bar_at(minute: i64, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Bar {
        let base = Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap();
        Bar {
            timestamp: base + chrono::Duration::minutes(minute),
            open,
            high,
            low,
            close,
            volume,
            buy_volume: None,
            sell_volume: None,
        }
    }
}
