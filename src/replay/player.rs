//! CSV player for replaying captured sessions

use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::ReplayError;

use super::file::{CsvFile, TIMESTAMP_HEADER};
use super::{Pacing, PlayerState, ReplayConfig};

/// Plays back the rows of a CSV capture
///
/// The player does not own a clock. The pacing loop asks [`next_delay`]
/// how long to sleep and then collects due rows with [`poll`].
///
/// [`next_delay`]: CsvPlayer::next_delay
/// [`poll`]: CsvPlayer::poll
#[derive(Debug)]
pub struct CsvPlayer {
    file: CsvFile,
    /// Column excluded from emitted rows
    timestamp_index: Option<usize>,
    /// Delay before each row after the first
    delays: Vec<Duration>,
    state: PlayerState,
    /// Index of the next row to emit
    position: usize,
    /// When the next row is due; `None` means immediately
    next_due: Option<Instant>,
}

impl CsvPlayer {
    /// Load a capture and prepare playback
    pub fn open(path: impl AsRef<Path>, config: ReplayConfig) -> Result<Self, ReplayError> {
        let file = CsvFile::load(path)?;
        Self::from_file(file, config)
    }

    pub fn from_file(file: CsvFile, config: ReplayConfig) -> Result<Self, ReplayError> {
        let timestamp_index = match &config.timestamp_column {
            Some(name) => Some(file.column_index(name).ok_or_else(|| {
                ReplayError::InvalidTimestampColumn {
                    column: name.clone(),
                    reason: "column not found in header".to_string(),
                }
            })?),
            None => file.column_index(TIMESTAMP_HEADER),
        };

        let delays = match config.pacing {
            Pacing::FixedInterval(interval) => vec![interval; file.rows.len() - 1],
            Pacing::TimestampColumn => {
                let index = timestamp_index.ok_or_else(|| ReplayError::InvalidTimestampColumn {
                    column: String::new(),
                    reason: "timestamp pacing needs a date/time column".to_string(),
                })?;
                let times = file.timestamps(index)?;
                times
                    .windows(2)
                    .map(|pair| clamp_delay(pair[1] - pair[0], config.max_delay))
                    .collect()
            }
        };

        tracing::debug!(
            "Replay of {:?}: {} rows, pacing {:?}",
            file.path,
            file.rows.len(),
            config.pacing
        );

        Ok(Self {
            file,
            timestamp_index,
            delays,
            state: PlayerState::Stopped,
            position: 0,
            next_due: None,
        })
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    /// Number of data rows
    pub fn row_count(&self) -> usize {
        self.file.rows.len()
    }

    /// Index of the next row to emit
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.row_count()
    }

    /// Headers of the emitted fields
    pub fn headers(&self) -> Vec<String> {
        self.without_timestamp(&self.file.headers)
    }

    /// Playback progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        self.position as f64 / self.row_count() as f64
    }

    /// Start or resume playback
    pub fn play(&mut self) {
        if self.state == PlayerState::Playing {
            return;
        }
        if self.is_finished() {
            self.position = 0;
        }
        self.next_due = None;
        self.state = PlayerState::Playing;
    }

    pub fn pause(&mut self) {
        if self.state == PlayerState::Playing {
            self.next_due = None;
            self.state = PlayerState::Paused;
        }
    }

    /// Stop playback and rewind
    pub fn stop(&mut self) {
        self.position = 0;
        self.next_due = None;
        self.state = PlayerState::Stopped;
    }

    /// Jump to a row; the next row is due immediately
    pub fn seek(&mut self, row: usize) {
        self.position = row.min(self.row_count());
        self.next_due = None;
    }

    /// Emit the next row while not playing
    pub fn step_forward(&mut self) -> Option<Vec<String>> {
        if self.is_playing() || self.is_finished() {
            return None;
        }
        let fields = self.row(self.position);
        self.position += 1;
        self.state = PlayerState::Paused;
        Some(fields)
    }

    /// Emit the row before the last emitted one while not playing
    pub fn step_backward(&mut self) -> Option<Vec<String>> {
        if self.is_playing() || self.position < 2 {
            return None;
        }
        self.position -= 2;
        self.step_forward()
    }

    /// Rows due at `now`, in order
    pub fn poll(&mut self, now: Instant) -> Vec<Vec<String>> {
        let mut due = Vec::new();
        while self.is_playing() && !self.is_finished() {
            let scheduled = match self.next_due {
                Some(at) if at > now => break,
                Some(at) => at,
                None => now,
            };

            due.push(self.row(self.position));
            self.position += 1;

            if self.is_finished() {
                tracing::info!("Replay finished after {} rows", self.row_count());
                self.next_due = None;
                self.state = PlayerState::Stopped;
            } else {
                self.next_due = Some(scheduled + self.delays[self.position - 1]);
            }
        }
        due
    }

    /// How long until the next row is due, `None` when nothing is scheduled
    pub fn next_delay(&self, now: Instant) -> Option<Duration> {
        if !self.is_playing() || self.is_finished() {
            return None;
        }
        Some(
            self.next_due
                .map(|at| at.saturating_duration_since(now))
                .unwrap_or(Duration::ZERO),
        )
    }

    fn row(&self, index: usize) -> Vec<String> {
        self.without_timestamp(&self.file.rows[index])
    }

    fn without_timestamp(&self, fields: &[String]) -> Vec<String> {
        fields
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != self.timestamp_index)
            .map(|(_, field)| field.clone())
            .collect()
    }
}

fn clamp_delay(seconds: f64, max: Duration) -> Duration {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(seconds.min(max.as_secs_f64()))
}
