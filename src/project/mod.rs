//! Project files
//!
//! A project describes how a device's frames are delimited and decoded, the
//! optional frame parser script, and the groups of datasets that make up a
//! dashboard. Project files are JSON with Serial Studio compatible keys:
//!
//! ```json
//! {
//!   "title": "Weather Station",
//!   "decoder": 0,
//!   "frameDetection": 1,
//!   "frameStart": "/*",
//!   "frameEnd": "*/",
//!   "hexadecimalDelimiters": false,
//!   "checksum": "",
//!   "frameParser": "fn parse(frame) { frame.split(\",\") }",
//!   "groups": [
//!     { "title": "Sensors", "widget": "", "datasets": [
//!       { "title": "Temperature", "index": 0, "units": "°C" }
//!     ] }
//!   ]
//! }
//! ```
//!
//! Dataset `index` is the 0-based position of the value in the field list
//! returned by the parser. Serial Studio numbers datasets from 1; load those
//! files with [`IndexBase::One`] to shift them down.
//!
//! An optional `actions` array lists commands that can be sent to the
//! device (see [`Action`]).

pub mod action;

pub use action::{Action, TimerMode};

use crate::error::{FrameVisError, Result};
use crate::frame::{
    parse_delimiter, ChecksumAlgorithm, DecoderMethod, FrameDetectionMode, FrameReaderConfig,
    OperationMode,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Project file extension
pub const PROJECT_FILE_EXTENSION: &str = "json";

/// Separator used when neither a script nor a legacy separator is configured
pub const DEFAULT_SEPARATOR: &str = ",";

/// Title of the generated Quick Plot group
pub const QUICK_PLOT_GROUP: &str = "Quick Plot";

fn default_frame_detection() -> FrameDetectionMode {
    // Projects written before the key existed used start + end delimiters
    FrameDetectionMode::StartAndEndDelimiter
}

/// Numbering of dataset indices in a project file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexBase {
    /// The first field is index 0
    #[default]
    Zero,
    /// The first field is index 1, as Serial Studio writes
    One,
}

/// A complete project definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub decoder: DecoderMethod,

    #[serde(default = "default_frame_detection")]
    pub frame_detection: FrameDetectionMode,

    #[serde(default)]
    pub frame_start: String,

    #[serde(default)]
    pub frame_end: String,

    /// Delimiters are written as hex bytes rather than text
    #[serde(default)]
    pub hexadecimal_delimiters: bool,

    #[serde(default)]
    pub checksum: ChecksumAlgorithm,

    /// Frame parser script source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_parser: Option<String>,

    /// Separator from older projects, passed to legacy parsers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,

    #[serde(default)]
    pub groups: Vec<Group>,

    /// Commands that can be sent to the device
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            title: String::new(),
            decoder: DecoderMethod::PlainText,
            frame_detection: default_frame_detection(),
            frame_start: "/*".to_string(),
            frame_end: "*/".to_string(),
            hexadecimal_delimiters: false,
            checksum: ChecksumAlgorithm::None,
            frame_parser: None,
            separator: None,
            groups: Vec::new(),
            actions: Vec::new(),
        }
    }
}

/// A titled collection of datasets rendered together
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(default)]
    pub title: String,

    /// Widget hint (`accelerometer`, `gyro`, `plot3d`, `map`, `multiplot`, ...)
    #[serde(default)]
    pub widget: String,

    #[serde(default)]
    pub datasets: Vec<Dataset>,
}

/// One named value extracted from each frame
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[serde(default)]
    pub title: String,

    /// 0-based position in the field list
    pub index: usize,

    #[serde(default)]
    pub units: String,

    #[serde(default)]
    pub min: f64,

    #[serde(default)]
    pub max: f64,

    #[serde(default)]
    pub alarm: f64,

    #[serde(default, rename = "overviewDisplay")]
    pub overview: bool,

    /// Widget hint; composite groups use `x`/`y`/`z` or `lat`/`lon`/`alt`
    #[serde(default)]
    pub widget: String,

    #[serde(default)]
    pub graph: bool,

    #[serde(default)]
    pub led: bool,
}

impl Dataset {
    pub fn new(title: impl Into<String>, index: usize) -> Self {
        Self {
            title: title.into(),
            index,
            ..Default::default()
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    pub fn with_widget(mut self, widget: impl Into<String>) -> Self {
        self.widget = widget.into();
        self
    }
}

impl Group {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_widget(mut self, widget: impl Into<String>) -> Self {
        self.widget = widget.into();
        self
    }

    pub fn with_dataset(mut self, dataset: Dataset) -> Self {
        self.datasets.push(dataset);
        self
    }
}

impl Project {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Auto-generated layout for `channels` comma-separated values
    pub fn quick_plot(channels: usize) -> Self {
        let group = Group {
            title: QUICK_PLOT_GROUP.to_string(),
            widget: "multiplot".to_string(),
            datasets: (0..channels)
                .map(|i| Dataset {
                    graph: true,
                    ..Dataset::new(format!("Channel {}", i + 1), i)
                })
                .collect(),
        };

        Self {
            title: QUICK_PLOT_GROUP.to_string(),
            frame_detection: FrameDetectionMode::EndDelimiterOnly,
            frame_start: String::new(),
            frame_end: "\n".to_string(),
            groups: vec![group],
            ..Default::default()
        }
    }

    /// Parse a project from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| FrameVisError::Config(format!("Failed to parse project: {}", e)))
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| FrameVisError::Config(format!("Failed to serialize project: {}", e)))
    }

    /// Load a project file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_base(path, IndexBase::Zero)
    }

    /// Load a project file whose dataset indices start at `base`
    pub fn load_with_base(path: impl AsRef<Path>, base: IndexBase) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FrameVisError::Config(format!("Failed to read project file {:?}: {}", path, e))
        })?;

        let mut project = serde_json::from_str::<Self>(&content).map_err(|e| {
            FrameVisError::Config(format!("Failed to parse project file {:?}: {}", path, e))
        })?;
        project.rebase_indices(base)?;

        tracing::info!(
            "Loaded project '{}' ({} groups, {} datasets)",
            project.title,
            project.groups.len(),
            project.dataset_count()
        );
        Ok(project)
    }

    /// Save the project to disk as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    FrameVisError::Config(format!("Failed to create project directory: {}", e))
                })?;
            }
        }

        std::fs::write(path, self.to_json()?).map_err(|e| {
            FrameVisError::Config(format!("Failed to write project file {:?}: {}", path, e))
        })
    }

    /// Convert dataset indices numbered from `base` to 0-based
    pub fn rebase_indices(&mut self, base: IndexBase) -> Result<()> {
        if base == IndexBase::Zero {
            return Ok(());
        }
        for group in &mut self.groups {
            for dataset in &mut group.datasets {
                dataset.index = dataset.index.checked_sub(1).ok_or_else(|| {
                    FrameVisError::Config(format!(
                        "Dataset '{}/{}' has index 0 in a 1-based project",
                        group.title, dataset.title
                    ))
                })?;
            }
        }
        Ok(())
    }

    pub fn dataset_count(&self) -> usize {
        self.groups.iter().map(|g| g.datasets.len()).sum()
    }

    /// Iterate all datasets with their group, in declaration order
    pub fn datasets(&self) -> impl Iterator<Item = (&Group, &Dataset)> {
        self.groups
            .iter()
            .flat_map(|g| g.datasets.iter().map(move |d| (g, d)))
    }

    /// Largest frame index referenced by any dataset
    pub fn max_index(&self) -> Option<usize> {
        self.datasets().map(|(_, d)| d.index).max()
    }

    /// The frame parser source, if one is set and non-blank
    pub fn parser_source(&self) -> Option<&str> {
        self.frame_parser
            .as_deref()
            .filter(|source| !source.trim().is_empty())
    }

    /// Separator for field splitting and legacy parsers
    pub fn separator(&self) -> &str {
        self.separator
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SEPARATOR)
    }

    /// Resolve the framing configuration for this project
    pub fn reader_config(&self, max_buffer_size: usize) -> Result<FrameReaderConfig> {
        let start = if self.frame_detection.uses_start() {
            parse_delimiter(&self.frame_start, self.hexadecimal_delimiters)?
        } else {
            Vec::new()
        };
        let end = if self.frame_detection.uses_end() {
            parse_delimiter(&self.frame_end, self.hexadecimal_delimiters)?
        } else {
            Vec::new()
        };

        let config = FrameReaderConfig {
            mode: self.frame_detection,
            operation_mode: OperationMode::ProjectFile,
            start,
            end,
            checksum: self.checksum,
            max_buffer_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the project is usable for a session
    pub fn validate(&self) -> Result<()> {
        if self.dataset_count() == 0 {
            return Err(FrameVisError::Config(format!(
                "Project '{}' declares no datasets",
                self.title
            )));
        }

        for group in &self.groups {
            if group.datasets.is_empty() {
                tracing::warn!("Group '{}' has no datasets", group.title);
            }
        }

        self.reader_config(crate::frame::DEFAULT_MAX_BUFFER_SIZE)?;
        for action in &self.actions {
            action.validate()?;
        }
        Ok(())
    }
}
