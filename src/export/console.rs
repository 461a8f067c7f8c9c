//! Console export
//!
//! Renders raw frames as log lines, either as text or as spaced hexadecimal,
//! and keeps the most recent lines in a bounded history.

use super::FrameSink;
use crate::error::Result;
use crate::frame::RawFrame;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Write as _;

/// Default number of lines kept in history
pub const DEFAULT_HISTORY: usize = 1000;

/// How raw frames are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    #[default]
    Text,
    Hex,
}

impl DisplayMode {
    pub fn render(&self, bytes: &[u8]) -> String {
        match self {
            DisplayMode::Text => {
                let mut line = String::with_capacity(bytes.len());
                for c in String::from_utf8_lossy(bytes).chars() {
                    if c.is_control() {
                        line.extend(c.escape_default());
                    } else {
                        line.push(c);
                    }
                }
                line
            }
            DisplayMode::Hex => {
                let mut line = String::with_capacity(bytes.len() * 3);
                for (i, byte) in bytes.iter().enumerate() {
                    if i > 0 {
                        line.push(' ');
                    }
                    let _ = write!(line, "{:02X}", byte);
                }
                line
            }
        }
    }
}

#[derive(Debug)]
pub struct ConsoleExport {
    mode: DisplayMode,
    show_timestamps: bool,
    echo: bool,
    history: VecDeque<String>,
    capacity: usize,
}

impl Default for ConsoleExport {
    fn default() -> Self {
        Self::new(DisplayMode::Text)
    }
}

impl ConsoleExport {
    pub fn new(mode: DisplayMode) -> Self {
        Self {
            mode,
            show_timestamps: false,
            echo: false,
            history: VecDeque::with_capacity(DEFAULT_HISTORY),
            capacity: DEFAULT_HISTORY,
        }
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.show_timestamps = enabled;
        self
    }

    /// Also print each line to stdout
    pub fn with_echo(mut self, enabled: bool) -> Self {
        self.echo = enabled;
        self
    }

    pub fn with_history(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
        self
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: DisplayMode) {
        self.mode = mode;
    }

    /// Lines in arrival order, oldest first
    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    fn push_line(&mut self, line: String) {
        tracing::debug!(target: "framevis_rs::console", "{}", line);
        if self.echo {
            println!("{}", line);
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(line);
    }
}

impl FrameSink for ConsoleExport {
    fn name(&self) -> &str {
        "Console"
    }

    fn on_raw_frame(&mut self, frame: &RawFrame) -> Result<()> {
        let body = self.mode.render(frame.as_bytes());
        let line = if self.show_timestamps {
            format!("[{}] {}", Local::now().format("%H:%M:%S%.3f"), body)
        } else {
            body
        };
        self.push_line(line);
        Ok(())
    }
}
