//! Project actions
//!
//! An action is a command the user can send to the device: a text line or
//! a hex-encoded binary payload. Actions may fire once when the session
//! connects and may repeat on a timer.

use crate::error::{FrameVisError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When an action repeats
///
/// Stored in project files as `0` off, `1` auto start, `2` start on
/// trigger, `3` toggle on trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TimerMode {
    /// Sent once per trigger
    #[default]
    Off,
    /// Repeats from the moment the session connects
    AutoStart,
    /// Repeats from the first trigger on
    StartOnTrigger,
    /// Each trigger starts or stops the repetition
    ToggleOnTrigger,
}

impl TryFrom<u8> for TimerMode {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(TimerMode::Off),
            1 => Ok(TimerMode::AutoStart),
            2 => Ok(TimerMode::StartOnTrigger),
            3 => Ok(TimerMode::ToggleOnTrigger),
            other => Err(format!("unknown timer mode {}", other)),
        }
    }
}

impl From<TimerMode> for u8 {
    fn from(value: TimerMode) -> Self {
        match value {
            TimerMode::Off => 0,
            TimerMode::AutoStart => 1,
            TimerMode::StartOnTrigger => 2,
            TimerMode::ToggleOnTrigger => 3,
        }
    }
}

/// A command sent to the device
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub icon: String,

    /// Text to send, or hex bytes when `binary` is set
    #[serde(default)]
    pub tx_data: String,

    /// Line ending appended to text payloads
    #[serde(default)]
    pub eol: String,

    #[serde(default)]
    pub binary: bool,

    #[serde(default)]
    pub timer_mode: TimerMode,

    #[serde(default)]
    pub timer_interval_ms: u64,

    #[serde(default)]
    pub auto_execute_on_connect: bool,
}

impl Action {
    pub fn new(title: impl Into<String>, tx_data: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            tx_data: tx_data.into(),
            ..Default::default()
        }
    }

    pub fn with_eol(mut self, eol: impl Into<String>) -> Self {
        self.eol = eol.into();
        self
    }

    pub fn binary(mut self) -> Self {
        self.binary = true;
        self
    }

    pub fn with_timer(mut self, mode: TimerMode, interval: Duration) -> Self {
        self.timer_mode = mode;
        self.timer_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn on_connect(mut self) -> Self {
        self.auto_execute_on_connect = true;
        self
    }

    /// Bytes written to the device when the action fires
    pub fn payload(&self) -> Result<Vec<u8>> {
        if self.binary {
            let digits: String = self
                .tx_data
                .chars()
                .filter(|c| !c.is_ascii_whitespace())
                .collect();
            return hex::decode(digits).map_err(|e| {
                FrameVisError::Config(format!(
                    "Action '{}' has invalid binary data: {}",
                    self.title, e
                ))
            });
        }

        let mut bytes = self.tx_data.as_bytes().to_vec();
        bytes.extend_from_slice(self.eol.as_bytes());
        Ok(bytes)
    }

    /// Repeat interval, `None` when the action never repeats
    pub fn interval(&self) -> Option<Duration> {
        (self.timer_mode != TimerMode::Off).then(|| Duration::from_millis(self.timer_interval_ms))
    }

    pub fn validate(&self) -> Result<()> {
        self.payload()?;
        if self.timer_mode != TimerMode::Off && self.timer_interval_ms == 0 {
            return Err(FrameVisError::Config(format!(
                "Action '{}' repeats but has no timer interval",
                self.title
            )));
        }
        Ok(())
    }
}
