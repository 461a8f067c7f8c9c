//! CSV capture files
//!
//! A capture has a header row and comma separated data rows. One column may
//! hold the receive time of each row, in the export format
//! (`2024/05/01 12:00:00::250`), RFC 3339, or plain seconds.

use crate::error::ReplayError;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};

/// Header written by CSV export for the receive time column
pub const TIMESTAMP_HEADER: &str = "RX Date/Time";

/// Timestamp format written by CSV export
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S::%3f";

/// Minimum number of data rows a replay needs
pub const MIN_ROWS: usize = 2;

/// A loaded CSV capture
#[derive(Debug, Clone)]
pub struct CsvFile {
    pub path: PathBuf,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let path = path.as_ref().to_path_buf();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&path)?;

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(ReplayError::MissingHeader(path));
        }

        let rows = reader
            .records()
            .map(|record| record.map(|r| r.iter().map(str::to_string).collect()))
            .collect::<Result<Vec<Vec<String>>, csv::Error>>()?;

        if rows.len() < MIN_ROWS {
            return Err(ReplayError::InsufficientData {
                path,
                found: rows.len(),
                required: MIN_ROWS,
            });
        }

        tracing::info!(
            "Loaded {} rows x {} columns from {:?}",
            rows.len(),
            headers.len(),
            path
        );
        Ok(Self {
            path,
            headers,
            rows,
        })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Receive time of every row in seconds, from column `index`
    pub fn timestamps(&self, index: usize) -> Result<Vec<f64>, ReplayError> {
        let column = self.headers.get(index).cloned().unwrap_or_default();
        self.rows
            .iter()
            .enumerate()
            .map(|(row, fields)| {
                let text = fields.get(index).map(String::as_str).unwrap_or("");
                parse_timestamp(text).ok_or_else(|| ReplayError::InvalidTimestampColumn {
                    column: column.clone(),
                    reason: format!("row {} has unparseable time '{}'", row + 1, text),
                })
            })
            .collect()
    }
}

/// Parse a timestamp into seconds
pub fn parse_timestamp(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some((datetime, millis)) = text.rsplit_once("::") {
        let base = NaiveDateTime::parse_from_str(datetime, "%Y/%m/%d %H:%M:%S").ok()?;
        let millis: u32 = millis.parse().ok()?;
        let utc = base.and_utc();
        return Some(utc.timestamp() as f64 + f64::from(millis) / 1000.0);
    }

    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Some(datetime.timestamp_millis() as f64 / 1000.0);
    }

    text.parse::<f64>().ok().filter(|secs| secs.is_finite())
}

/// Format a timestamp the way CSV export writes it
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}
