//! Frames that describe their own layout
//!
//! In device-sends-JSON mode the device transmits the whole dashboard with
//! every frame, values included:
//!
//! ```json
//! {"title": "Rover", "groups": [
//!     {"title": "Battery", "widget": "", "datasets": [
//!         {"title": "Voltage", "value": 12.5, "units": "V"}
//!     ]}
//! ]}
//! ```
//!
//! Datasets are numbered in declaration order; any `index` the device sends
//! is ignored.

use crate::error::MappingError;
use crate::project::{Dataset, Group, Project};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct JsonFrame {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub groups: Vec<JsonGroup>,
}

#[derive(Debug, Deserialize)]
pub struct JsonGroup {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub widget: String,
    #[serde(default)]
    pub datasets: Vec<JsonDataset>,
}

#[derive(Debug, Deserialize)]
pub struct JsonDataset {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub units: String,
    #[serde(default)]
    pub widget: String,
}

impl JsonFrame {
    pub fn parse(text: &str) -> Result<Self, MappingError> {
        serde_json::from_str(text.trim()).map_err(|e| MappingError::InvalidJson(e.to_string()))
    }

    /// Project equivalent of the frame structure
    pub fn project(&self) -> Project {
        let mut index = 0;
        let groups = self
            .groups
            .iter()
            .map(|g| Group {
                title: g.title.clone(),
                widget: g.widget.clone(),
                datasets: g
                    .datasets
                    .iter()
                    .map(|d| {
                        let dataset = Dataset::new(d.title.clone(), index)
                            .with_units(d.units.clone())
                            .with_widget(d.widget.clone());
                        index += 1;
                        dataset
                    })
                    .collect(),
            })
            .collect();

        Project {
            title: self.title.clone(),
            groups,
            ..Project::new("")
        }
    }

    /// Dataset values as field text, in declaration order
    pub fn fields(&self) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|g| g.datasets.iter())
            .map(|d| value_text(&d.value))
            .collect()
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
