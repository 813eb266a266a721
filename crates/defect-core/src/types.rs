//! Core type definitions for the defect classification project.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Index of a class in `0..K`.
pub type ClassLabel = usize;

/// A labelled image in a corpus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sample {
    /// Path to the image file
    pub path: PathBuf,
    /// True class label
    pub label: ClassLabel,
}

impl Sample {
    pub fn new(path: impl Into<PathBuf>, label: ClassLabel) -> Self {
        Self {
            path: path.into(),
            label,
        }
    }

    /// Opaque identifier used in reports.
    pub fn source(&self) -> String {
        self.path.display().to_string()
    }
}

/// Top-1 output of the classifier for one image
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    /// Arg-max class (lowest index on ties)
    pub label: ClassLabel,
    /// Softmax probability at `label`, in `[0, 1]`
    pub confidence: f32,
}

/// Corpus split
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DataSplit {
    Train,
    Val,
}

impl DataSplit {
    /// Subdirectory name under the data root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            DataSplit::Train => "train",
            DataSplit::Val => "val",
        }
    }
}

impl std::fmt::Display for DataSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Severity attached to a served prediction.
///
/// The classifier does not grade severity, so every response reports `Low`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Severity {
    #[default]
    Low,
}

/// Image dimensions (height, width, channels)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageDimensions {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageDimensions {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Square RGB input of the given side length.
    pub fn square_rgb(size: usize) -> Self {
        Self::new(size, size, 3)
    }

    /// Number of values in one CHW tensor.
    pub fn num_values(&self) -> usize {
        self.height * self.width * self.channels
    }
}

impl Default for ImageDimensions {
    fn default() -> Self {
        Self::square_rgb(224)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_source_is_path() {
        let sample = Sample::new("data/val/Wall_Crack/img_001.jpg", 2);
        assert_eq!(sample.source(), "data/val/Wall_Crack/img_001.jpg");
        assert_eq!(sample.label, 2);
    }

    #[test]
    fn test_split_dir_names() {
        assert_eq!(DataSplit::Train.to_string(), "train");
        assert_eq!(DataSplit::Val.dir_name(), "val");
    }

    #[test]
    fn test_severity_serializes_as_name() {
        assert_eq!(serde_json::to_string(&Severity::Low).unwrap(), "\"Low\"");
        assert_eq!(Severity::default(), Severity::Low);
    }

    #[test]
    fn test_default_dimensions() {
        let dims = ImageDimensions::default();
        assert_eq!(dims.num_values(), 3 * 224 * 224);
    }
}
