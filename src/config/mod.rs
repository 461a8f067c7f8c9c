//! Configuration module for FrameVis-RS
//!
//! This module handles the application configuration file, a TOML document
//! with one table per concern:
//!
//! ```toml
//! [transport]
//! kind = "network"
//! socket_type = "udp"
//! remote_address = "127.0.0.1"
//! remote_port = 9000
//!
//! [reader]
//! operation_mode = "project_file"
//! max_buffer_size = 10485760
//!
//! [replay]
//! interval_ms = 100
//!
//! [export]
//! csv_enabled = true
//! console_enabled = true
//! console_mode = "hex"
//! ```
//!
//! Every table and key is optional.
//!
//! # App Data Location
//!
//! CSV exports default to the platform data directory:
//! - **Linux**: `~/.local/share/framevis-rs/exports/`
//! - **macOS**: `~/Library/Application Support/framevis-rs/exports/`
//! - **Windows**: `%APPDATA%\framevis-rs\exports\`

use crate::error::{FrameVisError, Result};
use crate::export::DisplayMode;
use crate::frame::{OperationMode, DEFAULT_MAX_BUFFER_SIZE};
use crate::replay::{Pacing, ReplayConfig, DEFAULT_INTERVAL, DEFAULT_MAX_DELAY};
use crate::session::SessionConfig;
use crate::project::Project;
use crate::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "framevis-rs";

/// Default configuration filename
pub const CONFIG_FILE: &str = "framevis.toml";

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Default directory for CSV exports
pub fn default_export_dir() -> PathBuf {
    app_data_dir()
        .map(|p| p.join("exports"))
        .unwrap_or_else(|| PathBuf::from("exports"))
}

// ==================== Reader ====================

/// Frame reader settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderSettings {
    pub operation_mode: OperationMode,
    /// Frame buffer cap in bytes
    pub max_buffer_size: usize,
    /// Field separator override
    pub separator: Option<String>,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            operation_mode: OperationMode::ProjectFile,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            separator: None,
        }
    }
}

// ==================== Replay ====================

/// CSV replay settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySettings {
    /// Delay between rows for fixed-interval pacing
    pub interval_ms: u64,
    /// Pace by this date/time column instead of the fixed interval
    pub timestamp_column: Option<String>,
    /// Upper bound for a single timestamp-paced delay
    pub max_delay_ms: u64,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL.as_millis() as u64,
            timestamp_column: None,
            max_delay_ms: DEFAULT_MAX_DELAY.as_millis() as u64,
        }
    }
}

impl ReplaySettings {
    pub fn to_replay_config(&self) -> ReplayConfig {
        let pacing = match self.timestamp_column {
            Some(_) => Pacing::TimestampColumn,
            None => Pacing::FixedInterval(Duration::from_millis(self.interval_ms)),
        };
        ReplayConfig {
            pacing,
            timestamp_column: self.timestamp_column.clone(),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

// ==================== Export ====================

/// Sink settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub csv_enabled: bool,
    /// Directory for CSV files, the app data directory when unset
    pub csv_directory: Option<PathBuf>,
    pub console_enabled: bool,
    pub console_mode: DisplayMode,
    pub console_timestamps: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            csv_enabled: false,
            csv_directory: None,
            console_enabled: true,
            console_mode: DisplayMode::Text,
            console_timestamps: false,
        }
    }
}

impl ExportSettings {
    pub fn csv_directory(&self) -> PathBuf {
        self.csv_directory.clone().unwrap_or_else(default_export_dir)
    }
}

// ==================== App Config ====================

/// Application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub transport: TransportConfig,
    pub reader: ReaderSettings,
    pub replay: ReplaySettings,
    pub export: ExportSettings,
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| FrameVisError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| FrameVisError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FrameVisError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        let config = Self::from_toml(&content)?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load a configuration file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                FrameVisError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        std::fs::write(path, self.to_toml()?).map_err(|e| {
            FrameVisError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Session settings for a project under this configuration
    pub fn session_config(&self, project: Arc<Project>) -> SessionConfig {
        SessionConfig {
            operation_mode: self.reader.operation_mode,
            max_buffer_size: self.reader.max_buffer_size,
            separator: self.reader.separator.clone(),
            ..SessionConfig::new(project)
        }
    }
}
