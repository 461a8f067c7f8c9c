//! CSV replay
//!
//! Replays a CSV capture row by row through the same frame builder used for
//! live devices. Rows are paced either at a fixed interval or by the deltas
//! of a date/time column.
//!
//! # Features
//!
//! - Fixed-interval or timestamp-column pacing, clamped to a maximum delay
//! - Play, pause, stop, seek and single-step control
//! - Reads the files written by [`CsvExport`](crate::export::CsvExport)

pub mod file;
pub mod player;

pub use file::{CsvFile, TIMESTAMP_FORMAT, TIMESTAMP_HEADER};
pub use player::CsvPlayer;

use std::time::Duration;

/// Default delay between rows for fixed-interval pacing
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Default upper bound for a single timestamp-paced delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// How the delay between consecutive rows is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Same delay between every pair of rows
    FixedInterval(Duration),
    /// Delta between the rows' timestamp column values
    TimestampColumn,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing::FixedInterval(DEFAULT_INTERVAL)
    }
}

/// Replay settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    pub pacing: Pacing,
    /// Date/time column, excluded from the emitted fields.
    /// When unset a leading `RX Date/Time` column is picked up automatically.
    pub timestamp_column: Option<String>,
    pub max_delay: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            pacing: Pacing::default(),
            timestamp_column: None,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl ReplayConfig {
    pub fn fixed_interval(interval: Duration) -> Self {
        Self {
            pacing: Pacing::FixedInterval(interval),
            ..Default::default()
        }
    }

    pub fn timestamp_column(column: impl Into<String>) -> Self {
        Self {
            pacing: Pacing::TimestampColumn,
            timestamp_column: Some(column.into()),
            ..Default::default()
        }
    }
}

/// Player state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlayerState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlayerState::Playing)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, PlayerState::Paused)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PlayerState::Stopped => "Stopped",
            PlayerState::Playing => "Playing",
            PlayerState::Paused => "Paused",
        }
    }
}
