//! Test data builders for creating projects

use framevis_rs::frame::FrameDetectionMode;
use framevis_rs::project::{Dataset, Group, Project};
use std::sync::Arc;

/// Builder for creating test Projects
pub struct ProjectBuilder {
    project: Project,
}

impl ProjectBuilder {
    /// `$`-started, `;`-terminated text frames
    pub fn new(title: &str) -> Self {
        let mut project = Project::new(title);
        project.frame_detection = FrameDetectionMode::StartAndEndDelimiter;
        project.frame_start = "$".to_string();
        project.frame_end = ";".to_string();
        Self { project }
    }

    pub fn delimiters(mut self, mode: FrameDetectionMode, start: &str, end: &str) -> Self {
        self.project.frame_detection = mode;
        self.project.frame_start = start.to_string();
        self.project.frame_end = end.to_string();
        self
    }

    pub fn parser(mut self, source: &str) -> Self {
        self.project.frame_parser = Some(source.to_string());
        self
    }

    /// Add a group with one dataset per title, indexed from `first_index`
    pub fn group(mut self, title: &str, first_index: usize, datasets: &[&str]) -> Self {
        let mut group = Group::new(title);
        for (i, name) in datasets.iter().enumerate() {
            group = group.with_dataset(Dataset::new(*name, first_index + i));
        }
        self.project.groups.push(group);
        self
    }

    pub fn build(self) -> Project {
        self.project
    }

    pub fn shared(self) -> Arc<Project> {
        Arc::new(self.project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_builder() {
        let project = ProjectBuilder::new("test")
            .group("Env", 0, &["Temp", "Hum"])
            .group("Power", 2, &["Volts"])
            .build();

        assert_eq!(project.title, "test");
        assert_eq!(project.dataset_count(), 3);
        assert_eq!(project.max_index(), Some(2));
        assert!(project.validate().is_ok());
    }
}
