//! Composite groups
//!
//! Some group widgets combine several datasets into one reading: three axes
//! for accelerometer, gyroscope and 3D plot widgets, or a latitude /
//! longitude / altitude triple for map widgets. The mapping from axis to
//! dataset is resolved once when the project is loaded.

use crate::project::Group;

/// Kind of composite widget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeKind {
    Accelerometer,
    Gyroscope,
    Plot3D,
    Gps,
}

impl CompositeKind {
    /// Detect the composite kind from a group widget hint
    pub fn from_widget(widget: &str) -> Option<Self> {
        match widget.trim().to_ascii_lowercase().as_str() {
            "accelerometer" => Some(CompositeKind::Accelerometer),
            "gyro" | "gyroscope" => Some(CompositeKind::Gyroscope),
            "plot3d" => Some(CompositeKind::Plot3D),
            "map" | "gps" => Some(CompositeKind::Gps),
            _ => None,
        }
    }

    /// Dataset widget hints naming each axis
    pub fn axis_names(&self) -> [&'static str; 3] {
        match self {
            CompositeKind::Gps => ["lat", "lon", "alt"],
            _ => ["x", "y", "z"],
        }
    }

    /// Number of axes that must be present
    pub fn required_axes(&self) -> usize {
        match self {
            // Altitude is optional
            CompositeKind::Gps => 2,
            _ => 3,
        }
    }
}

/// Static axis mapping for one composite group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeGroup {
    pub kind: CompositeKind,
    pub title: String,
    /// Position of each axis in the flattened dataset list
    pub axes: [Option<usize>; 3],
}

/// One composite reading taken from a data frame
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeReading<'a> {
    pub kind: CompositeKind,
    pub title: &'a str,
    pub axes: [Option<f64>; 3],
}

impl CompositeGroup {
    /// Resolve the axes of `group`, whose first dataset sits at `offset`
    ///
    /// Axes are matched by dataset widget hint first; unmatched axes take the
    /// remaining datasets in declaration order.
    pub fn resolve(group: &Group, offset: usize) -> Option<Self> {
        let kind = CompositeKind::from_widget(&group.widget)?;
        let names = kind.axis_names();

        let mut axes: [Option<usize>; 3] = [None; 3];
        let mut used = vec![false; group.datasets.len()];
        for (axis, name) in names.iter().enumerate() {
            if let Some(pos) = group
                .datasets
                .iter()
                .position(|d| d.widget.trim().eq_ignore_ascii_case(name))
            {
                if !used[pos] {
                    axes[axis] = Some(pos);
                    used[pos] = true;
                }
            }
        }

        let mut unused = (0..group.datasets.len()).filter(|i| !used[*i]);
        for axis in axes.iter_mut() {
            if axis.is_none() {
                *axis = unused.next();
            }
        }

        let present = axes.iter().filter(|a| a.is_some()).count();
        if present < kind.required_axes() {
            tracing::warn!(
                "Group '{}' uses a {:?} widget but only has {} of {} datasets",
                group.title,
                kind,
                present,
                kind.required_axes()
            );
            return None;
        }

        Some(Self {
            kind,
            title: group.title.clone(),
            axes: axes.map(|a| a.map(|pos| pos + offset)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Dataset;

    #[test]
    fn test_widget_detection() {
        assert_eq!(CompositeKind::from_widget("Gyro"), Some(CompositeKind::Gyroscope));
        assert_eq!(CompositeKind::from_widget("map"), Some(CompositeKind::Gps));
        assert_eq!(CompositeKind::from_widget("multiplot"), None);
    }

    #[test]
    fn test_resolve_by_widget_hint() {
        let group = Group::new("IMU")
            .with_widget("accelerometer")
            .with_dataset(Dataset::new("Z", 5).with_widget("z"))
            .with_dataset(Dataset::new("X", 3).with_widget("x"))
            .with_dataset(Dataset::new("Y", 4).with_widget("y"));

        let composite = CompositeGroup::resolve(&group, 10).unwrap();
        assert_eq!(composite.axes, [Some(11), Some(12), Some(10)]);
    }

    #[test]
    fn test_resolve_declaration_order() {
        let group = Group::new("Position")
            .with_widget("map")
            .with_dataset(Dataset::new("Latitude", 0))
            .with_dataset(Dataset::new("Longitude", 1));

        let composite = CompositeGroup::resolve(&group, 0).unwrap();
        assert_eq!(composite.kind, CompositeKind::Gps);
        assert_eq!(composite.axes, [Some(0), Some(1), None]);
    }

    #[test]
    fn test_incomplete_group() {
        let group = Group::new("Gyro")
            .with_widget("gyro")
            .with_dataset(Dataset::new("X", 0));
        assert!(CompositeGroup::resolve(&group, 0).is_none());
    }
}
