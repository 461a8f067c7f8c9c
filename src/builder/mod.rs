//! Frame builder
//!
//! Maps the ordered field list produced by the parser onto the project's
//! datasets, producing one [`DataFrame`] per frame.
//!
//! # Layout
//!
//! The dataset list, frame indices and composite groups are flattened into a
//! [`FrameLayout`] when the builder is created. Every frame shares the layout
//! through an `Arc`, so a published frame only owns its values.
//!
//! # Rejection
//!
//! A field list that does not reach the highest declared frame index is
//! rejected as a whole. Frames are never padded.
//!
//! # Quick Plot
//!
//! [`FrameBuilder::quick_plot`] generates the layout from the data: one
//! "Channel N" dataset per field, rebuilt whenever the field count changes.
//!
//! # Device JSON
//!
//! [`FrameBuilder::device_json`] takes the layout from each JSON frame and
//! only replaces it when the structure the device sends changes.

pub mod composite;
pub mod json;

pub use composite::{CompositeGroup, CompositeKind, CompositeReading};
pub use json::JsonFrame;

use crate::error::MappingError;
use crate::project::Project;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// Resolved description of one dataset
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetInfo {
    pub group: String,
    pub title: String,
    pub units: String,
    /// Position in the field list
    pub index: usize,
    pub widget: String,
}

impl DatasetInfo {
    /// Column name used by CSV export, `Group/Title [units]`
    pub fn column_name(&self) -> String {
        if self.units.is_empty() {
            format!("{}/{}", self.group, self.title)
        } else {
            format!("{}/{} [{}]", self.group, self.title, self.units)
        }
    }
}

/// Static mapping shared by all frames built from one project
#[derive(Debug, Clone, PartialEq)]
pub struct FrameLayout {
    pub title: String,
    pub datasets: Vec<DatasetInfo>,
    pub composites: Vec<CompositeGroup>,
    /// Highest frame index any dataset reads
    pub max_index: Option<usize>,
}

impl FrameLayout {
    pub fn from_project(project: &Project) -> Self {
        let mut datasets = Vec::with_capacity(project.dataset_count());
        let mut composites = Vec::new();

        for group in &project.groups {
            if let Some(composite) = CompositeGroup::resolve(group, datasets.len()) {
                composites.push(composite);
            }
            datasets.extend(group.datasets.iter().map(|d| DatasetInfo {
                group: group.title.clone(),
                title: d.title.clone(),
                units: d.units.clone(),
                index: d.index,
                widget: d.widget.clone(),
            }));
        }

        Self {
            title: project.title.clone(),
            max_index: datasets.iter().map(|d| d.index).max(),
            datasets,
            composites,
        }
    }

    /// CSV column names, in dataset order
    pub fn column_names(&self) -> Vec<String> {
        self.datasets.iter().map(DatasetInfo::column_name).collect()
    }

    /// Minimum number of fields a frame needs
    pub fn required_fields(&self) -> usize {
        self.max_index.map_or(0, |i| i + 1)
    }

    /// Dataset exported under `column`, with or without its units suffix
    pub fn dataset_for_column(&self, column: &str) -> Option<&DatasetInfo> {
        let column = column.trim();
        self.datasets
            .iter()
            .find(|d| d.column_name() == column)
            .or_else(|| {
                self.datasets
                    .iter()
                    .find(|d| column.split_once('/') == Some((d.group.as_str(), d.title.as_str())))
            })
    }
}

/// Places the columns of a CSV capture at the frame index of the dataset
/// each column was exported from
///
/// Columns named `Group/Dataset` go to that dataset's index. Any other
/// column keeps its own position unless a named column already claims it.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMap {
    targets: Vec<Option<usize>>,
    matched: usize,
}

impl ColumnMap {
    pub fn new(layout: &FrameLayout, headers: &[String]) -> Self {
        let mut targets: Vec<Option<usize>> = headers
            .iter()
            .map(|h| layout.dataset_for_column(h).map(|d| d.index))
            .collect();
        let matched = targets.iter().flatten().count();

        let claimed: HashSet<usize> = targets.iter().flatten().copied().collect();
        for (position, target) in targets.iter_mut().enumerate() {
            if target.is_none() {
                if claimed.contains(&position) {
                    tracing::debug!("Column '{}' has no free frame index", headers[position]);
                } else {
                    *target = Some(position);
                }
            }
        }

        Self { targets, matched }
    }

    /// Number of columns matched to a dataset by name
    pub fn matched(&self) -> usize {
        self.matched
    }

    /// Field list for one row; unmapped frame indices are left empty
    pub fn apply(&self, row: &[String]) -> Vec<String> {
        let width = self
            .targets
            .iter()
            .take(row.len())
            .flatten()
            .max()
            .map_or(0, |i| i + 1);

        let mut fields = vec![String::new(); width];
        for (target, value) in self.targets.iter().zip(row) {
            if let Some(index) = target {
                fields[*index] = value.clone();
            }
        }
        fields
    }
}

/// The value of one dataset in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetValue {
    /// Field text as produced by the parser
    pub text: String,
    /// Numeric interpretation, when the text is a number
    pub value: Option<f64>,
}

impl DatasetValue {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let value = text.trim().parse::<f64>().ok();
        Self { text, value }
    }
}

/// A complete snapshot of every dataset for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    pub layout: Arc<FrameLayout>,
    /// Decode time
    pub timestamp: DateTime<Utc>,
    /// One value per dataset, in layout order
    pub values: Vec<DatasetValue>,
}

impl DataFrame {
    pub fn title(&self) -> &str {
        &self.layout.title
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Datasets paired with their values
    pub fn iter(&self) -> impl Iterator<Item = (&DatasetInfo, &DatasetValue)> {
        self.layout.datasets.iter().zip(self.values.iter())
    }

    /// Look up a value by group and dataset title
    pub fn get(&self, group: &str, title: &str) -> Option<&DatasetValue> {
        self.iter()
            .find(|(info, _)| info.group == group && info.title == title)
            .map(|(_, value)| value)
    }

    /// Readings of every composite group
    pub fn composites(&self) -> impl Iterator<Item = CompositeReading<'_>> {
        self.layout.composites.iter().map(|c| CompositeReading {
            kind: c.kind,
            title: &c.title,
            axes: c
                .axes
                .map(|axis| axis.and_then(|pos| self.values.get(pos)).and_then(|v| v.value)),
        })
    }
}

/// Where a builder's layout comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayoutSource {
    Project,
    QuickPlot,
    DeviceJson,
}

/// Builds data frames from field lists
#[derive(Debug)]
pub struct FrameBuilder {
    layout: Arc<FrameLayout>,
    source: LayoutSource,
    frames_built: u64,
}

impl FrameBuilder {
    /// Builder for a loaded project
    pub fn new(project: Arc<Project>) -> Self {
        let layout = FrameLayout::from_project(&project);
        tracing::debug!(
            "Frame layout for '{}': {} datasets, {} composite groups, {} fields required",
            layout.title,
            layout.datasets.len(),
            layout.composites.len(),
            layout.required_fields()
        );

        Self {
            layout: Arc::new(layout),
            source: LayoutSource::Project,
            frames_built: 0,
        }
    }

    /// Builder that generates its layout from incoming data
    pub fn quick_plot() -> Self {
        Self {
            layout: Arc::new(FrameLayout::from_project(&Project::quick_plot(0))),
            source: LayoutSource::QuickPlot,
            frames_built: 0,
        }
    }

    /// Builder for devices that send JSON frames
    pub fn device_json() -> Self {
        Self {
            layout: Arc::new(FrameLayout::from_project(&Project::new(""))),
            source: LayoutSource::DeviceJson,
            frames_built: 0,
        }
    }

    pub fn layout(&self) -> &Arc<FrameLayout> {
        &self.layout
    }

    pub fn is_quick_plot(&self) -> bool {
        self.source == LayoutSource::QuickPlot
    }

    pub fn is_device_json(&self) -> bool {
        self.source == LayoutSource::DeviceJson
    }

    pub fn frames_built(&self) -> u64 {
        self.frames_built
    }

    /// Map a field list onto the datasets, timestamped now
    pub fn build(&mut self, fields: &[String]) -> Result<DataFrame, MappingError> {
        self.build_at(fields, Utc::now())
    }

    /// Map a field list onto the datasets with an explicit timestamp
    pub fn build_at(
        &mut self,
        fields: &[String],
        timestamp: DateTime<Utc>,
    ) -> Result<DataFrame, MappingError> {
        if fields.is_empty() {
            return Err(MappingError::Empty);
        }

        if self.is_quick_plot() && self.layout.datasets.len() != fields.len() {
            tracing::info!("Quick Plot layout changed to {} channels", fields.len());
            self.layout = Arc::new(FrameLayout::from_project(&Project::quick_plot(
                fields.len(),
            )));
        }

        if fields.len() < self.layout.required_fields() {
            // Report the first dataset that cannot be filled
            let missing = self
                .layout
                .datasets
                .iter()
                .find(|d| d.index >= fields.len());
            return Err(MappingError::MissingField {
                dataset: missing.map(|d| d.title.clone()).unwrap_or_default(),
                index: missing.map_or(fields.len(), |d| d.index),
                fields: fields.len(),
            });
        }

        let values = self
            .layout
            .datasets
            .iter()
            .map(|d| DatasetValue::new(fields[d.index].as_str()))
            .collect();

        self.frames_built += 1;
        Ok(DataFrame {
            layout: Arc::clone(&self.layout),
            timestamp,
            values,
        })
    }

    /// Build a frame from a device JSON document
    pub fn build_json(&mut self, text: &str) -> Result<DataFrame, MappingError> {
        let frame = JsonFrame::parse(text)?;
        let layout = FrameLayout::from_project(&frame.project());
        if *self.layout != layout {
            tracing::info!(
                "Device layout '{}' now has {} datasets in {} groups",
                layout.title,
                layout.datasets.len(),
                frame.groups.len()
            );
            self.layout = Arc::new(layout);
        }
        self.build(&frame.fields())
    }
}
