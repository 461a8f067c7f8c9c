//! CSV export
//!
//! Writes one row per published frame: the receive time followed by every
//! dataset value in declaration order. The output is readable by
//! [`CsvPlayer`](crate::replay::CsvPlayer).

use super::FrameSink;
use crate::builder::DataFrame;
use crate::error::{FrameVisError, Result};
use crate::replay::file::{format_timestamp, TIMESTAMP_HEADER};
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub struct CsvExport {
    writer: ::csv::Writer<BufWriter<File>>,
    path: PathBuf,
    /// Column names of the header written so far
    columns: Option<Vec<String>>,
    rows_written: u64,
}

impl CsvExport {
    /// Create (or truncate) the file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                FrameVisError::Config(format!("Failed to create export directory: {}", e))
            })?;
        }

        let file = File::create(&path).map_err(|e| {
            FrameVisError::Config(format!("Failed to create CSV file {:?}: {}", path, e))
        })?;
        tracing::info!("CSV export writing to {:?}", path);

        Ok(Self {
            writer: ::csv::WriterBuilder::new()
                .flexible(true)
                .from_writer(BufWriter::new(file)),
            path,
            columns: None,
            rows_written: 0,
        })
    }

    /// Create a file named after the project and start time inside `directory`
    pub fn in_directory(
        directory: impl AsRef<Path>,
        title: &str,
        started: DateTime<Local>,
    ) -> Result<Self> {
        Self::create(export_path(directory.as_ref(), title, started))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    fn write_header(&mut self, frame: &DataFrame) -> Result<()> {
        let columns = frame.layout.column_names();
        if let Some(existing) = &self.columns {
            if *existing != columns {
                tracing::warn!(
                    "Frame layout changed from {} to {} columns, CSV header is stale",
                    existing.len(),
                    columns.len()
                );
                self.columns = Some(columns);
            }
            return Ok(());
        }

        let mut header = Vec::with_capacity(columns.len() + 1);
        header.push(TIMESTAMP_HEADER.to_string());
        header.extend(columns.iter().cloned());
        self.writer.write_record(&header).map_err(csv_error)?;
        self.columns = Some(columns);
        Ok(())
    }
}

/// `<directory>/<title>/<yyyy-mm-dd_hh-mm-ss>.csv`
pub fn export_path(directory: &Path, title: &str, started: DateTime<Local>) -> PathBuf {
    let title: String = title
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let title = if title.is_empty() {
        "Untitled".to_string()
    } else {
        title
    };
    directory
        .join(title)
        .join(format!("{}.csv", started.format("%Y-%m-%d_%H-%M-%S")))
}

fn csv_error(err: ::csv::Error) -> FrameVisError {
    FrameVisError::Io(std::io::Error::other(err.to_string()))
}

impl FrameSink for CsvExport {
    fn name(&self) -> &str {
        "CSV export"
    }

    fn on_frame(&mut self, frame: &DataFrame) -> Result<()> {
        self.write_header(frame)?;

        let mut record = Vec::with_capacity(frame.len() + 1);
        record.push(format_timestamp(&frame.timestamp));
        record.extend(frame.values.iter().map(|v| v.text.clone()));
        self.writer.write_record(&record).map_err(csv_error)?;
        self.rows_written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        if self.rows_written > 0 {
            tracing::info!(
                "CSV export flushed {} rows to {:?}",
                self.rows_written,
                self.path
            );
        }
        Ok(())
    }
}

impl Drop for CsvExport {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
