//! Bar feed: CSV (optionally zstd-compressed) loading and update sequencing

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::types::{Bar, BarUpdate};

/// CSV row: `timestamp,open,high,low,close`, extra columns ignored
#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

impl CsvRow {
    fn into_bar(self) -> Result<Bar> {
        let timestamp = parse_timestamp(&self.timestamp)?;
        make_bar(timestamp, self.open, self.high, self.low, self.close)
    }
}

fn make_bar(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Result<Bar> {
    if ![open, high, low, close].iter().all(|p| p.is_finite()) {
        bail!("Non-finite price in bar at {}", timestamp);
    }
    Ok(Bar::new(timestamp, open, high, low, close))
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (taken as UTC), or epoch
/// seconds / milliseconds.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(epoch) = raw.parse::<i64>() {
        // Anything past year ~2286 in seconds is really milliseconds
        let ts = if epoch.abs() >= 10_000_000_000 {
            DateTime::from_timestamp_millis(epoch)
        } else {
            DateTime::from_timestamp(epoch, 0)
        };
        return ts.with_context(|| format!("Timestamp out of range: {}", raw));
    }

    bail!("Failed to parse timestamp: {}", raw)
}

/// Read bars from any CSV source with a header row
pub fn read_bars<R: Read>(reader: R) -> Result<Vec<Bar>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut bars = Vec::new();
    for (line, result) in csv_reader.deserialize().enumerate() {
        let row: CsvRow = result.with_context(|| format!("Failed to parse CSV row {}", line + 1))?;
        bars.push(row.into_bar().with_context(|| format!("Bad bar in row {}", line + 1))?);
    }
    Ok(bars)
}

/// Load bars from a `.csv` or `.csv.zst` file
pub fn load_bars(path: &Path) -> Result<Vec<Bar>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;

    let bars = if path.extension().map_or(false, |ext| ext == "zst") {
        let decoder = zstd::stream::Decoder::new(file)
            .with_context(|| format!("Failed to create zstd decoder for: {:?}", path))?;
        read_bars(BufReader::new(decoder))
    } else {
        read_bars(BufReader::new(file))
    }
    .with_context(|| format!("Failed to read bars from {:?}", path))?;

    tracing::debug!("Loaded {} bars from {:?}", bars.len(), path);
    Ok(bars)
}

/// Parse one streamed CSV line. Returns `None` for blank lines and the header.
pub fn parse_bar_line(line: &str) -> Result<Option<Bar>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("timestamp") {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 5 {
        bail!("Expected timestamp,open,high,low,close, got {:?}", line);
    }
    let price = |i: usize| -> Result<f64> {
        fields[i]
            .parse::<f64>()
            .with_context(|| format!("Bad price {:?}", fields[i]))
    };

    let timestamp = parse_timestamp(fields[0])?;
    make_bar(timestamp, price(1)?, price(2)?, price(3)?, price(4)?).map(Some)
}

/// Turns raw bars into indexed updates. A repeated timestamp is the forming
/// bar being re-delivered and keeps its index.
#[derive(Debug, Default)]
pub struct FeedSequencer {
    last: Option<(usize, DateTime<Utc>)>,
}

impl FeedSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bar: Bar, is_live: bool) -> Result<BarUpdate> {
        let index = match self.last {
            None => 0,
            Some((index, ts)) if bar.timestamp == ts => index,
            Some((index, ts)) if bar.timestamp > ts => index + 1,
            Some((_, ts)) => bail!(
                "Bar timestamp {} goes backwards (last was {})",
                bar.timestamp,
                ts
            ),
        };
        self.last = Some((index, bar.timestamp));

        Ok(BarUpdate {
            index,
            bar,
            is_live,
        })
    }

    /// Number of distinct bars sequenced so far
    pub fn len(&self) -> usize {
        self.last.map_or(0, |(index, _)| index + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }
}
