use crate::error::DataError;
use crate::models::Bar;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use log::info;
use std::path::Path;

const REQUIRED_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

/// Loads a bar series from a CSV file with `timestamp,open,high,low,close,
/// volume` columns. Header matching is case-insensitive and column order is
/// free; timestamps are RFC 3339 strings or millisecond epochs. Rows must
/// be in strictly ascending time order.
pub fn load_bars_csv(path: &Path) -> Result<Vec<Bar>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header row of {}", path.display()))?
        .clone();
    let mut column_indexes = [0usize; 6];
    for (slot, name) in REQUIRED_COLUMNS.iter().enumerate() {
        column_indexes[slot] = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or(DataError::MissingColumn(name))?;
    }

    let mut bars = Vec::new();
    for (row_number, record) in reader.records().enumerate() {
        let record = record
            .with_context(|| format!("Failed to read row {} of {}", row_number, path.display()))?;
        let field = |slot: usize| record.get(column_indexes[slot]).unwrap_or("").trim();

        let timestamp = parse_timestamp(field(0)).ok_or_else(|| DataError::BadField {
            row: row_number,
            field: "timestamp",
            value: field(0).to_string(),
        })?;
        if let Some(previous) = bars.last().map(|b: &Bar| b.timestamp) {
            if timestamp <= previous {
                return Err(DataError::NonMonotonic {
                    row: row_number,
                    previous: previous.to_rfc3339(),
                    current: timestamp.to_rfc3339(),
                }
                .into());
            }
        }

        let numeric = |slot: usize, name: &'static str| -> Result<f64, DataError> {
            let raw = field(slot);
            let value: f64 = raw.parse().map_err(|_| DataError::BadField {
                row: row_number,
                field: name,
                value: raw.to_string(),
            })?;
            if !value.is_finite() {
                return Err(DataError::BadField {
                    row: row_number,
                    field: name,
                    value: raw.to_string(),
                });
            }
            Ok(value)
        };

        bars.push(Bar {
            timestamp,
            open: numeric(1, "open")?,
            high: numeric(2, "high")?,
            low: numeric(3, "low")?,
            close: numeric(4, "close")?,
            volume: numeric(5, "volume")?,
        });
    }

    if bars.is_empty() {
        return Err(DataError::Empty.into());
    }
    info!(
        "Loaded {} bars from {} ({} .. {})",
        bars.len(),
        path.display(),
        bars[0].timestamp,
        bars[bars.len() - 1].timestamp
    );
    Ok(bars)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let millis: i64 = raw.parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn loads_rfc3339_rows() {
        let file = write_csv(
            "timestamp,open,high,low,close,volume\n\
             2024-03-01T00:00:00Z,100,101,99,100.5,1500\n\
             2024-03-01T01:00:00Z,100.5,102,100,101.5,1800\n",
        );
        let bars = load_bars_csv(file.path()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[1].close, 101.5);
        assert!(bars[0].timestamp < bars[1].timestamp);
    }

    #[test]
    fn headers_match_any_case_and_order() {
        let file = write_csv(
            "Volume,Close,Low,High,Open,Timestamp\n\
             1500,100.5,99,101,100,1709251200000\n",
        );
        let bars = load_bars_csv(file.path()).unwrap();
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].volume, 1500.0);
    }

    #[test]
    fn missing_column_is_reported() {
        let file = write_csv("timestamp,open,high,low,close\n2024-03-01T00:00:00Z,1,1,1,1\n");
        let error = load_bars_csv(file.path()).unwrap_err();
        assert!(error.to_string().contains("volume"));
    }

    #[test]
    fn out_of_order_rows_are_rejected() {
        let file = write_csv(
            "timestamp,open,high,low,close,volume\n\
             2024-03-01T01:00:00Z,100,101,99,100,1\n\
             2024-03-01T00:00:00Z,100,101,99,100,1\n",
        );
        let error = load_bars_csv(file.path()).unwrap_err();
        assert!(error.to_string().contains("advance"));
    }

    #[test]
    fn malformed_price_is_rejected() {
        let file = write_csv(
            "timestamp,open,high,low,close,volume\n\
             2024-03-01T00:00:00Z,abc,101,99,100,1\n",
        );
        assert!(load_bars_csv(file.path()).is_err());
    }

    #[test]
    fn empty_file_is_rejected() {
        let file = write_csv("timestamp,open,high,low,close,volume\n");
        let error = load_bars_csv(file.path()).unwrap_err();
        assert!(error.to_string().contains("no bars"));
    }
}
