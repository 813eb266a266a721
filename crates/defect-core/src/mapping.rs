//! Persisted index → class-name table.
//!
//! Training writes `classes.json` next to the model weights; evaluation and
//! serving read it back and label corpora through it instead of rescanning
//! class directories.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::{ClassLabel, Error, Result};

/// File name of the mapping inside a model directory.
pub const CLASS_MAPPING_FILE: &str = "classes.json";

/// Format version written by this build.
pub const CLASS_MAPPING_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassMapping {
    pub version: u32,
    pub classes: Vec<String>,
}

impl ClassMapping {
    /// Build a mapping; names must be unique and non-empty.
    pub fn new(classes: Vec<String>) -> Result<Self> {
        if classes.is_empty() {
            return Err(Error::InvalidArgument(
                "class mapping needs at least one class".into(),
            ));
        }
        for (i, name) in classes.iter().enumerate() {
            if name.is_empty() {
                return Err(Error::InvalidArgument(format!("class {i} has an empty name")));
            }
            if classes[..i].contains(name) {
                return Err(Error::InvalidArgument(format!("duplicate class name '{name}'")));
            }
        }
        Ok(Self {
            version: CLASS_MAPPING_VERSION,
            classes,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn name(&self, label: ClassLabel) -> Option<&str> {
        self.classes.get(label).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<ClassLabel> {
        self.classes.iter().position(|c| c == name)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!("Class mapping ({} classes) saved to {:?}", self.num_classes(), path);
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "class mapping not found at {}",
                path.display()
            )));
        }
        let json = fs::read_to_string(path)?;
        let mapping: ClassMapping = serde_json::from_str(&json)?;
        if mapping.version > CLASS_MAPPING_VERSION {
            return Err(Error::Config(format!(
                "class mapping version {} is newer than supported version {}",
                mapping.version, CLASS_MAPPING_VERSION
            )));
        }
        let mapping = ClassMapping::new(mapping.classes)?;
        debug!("Loaded class mapping from {:?}: {:?}", path, mapping.classes);
        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_lookup() {
        let mapping = ClassMapping::new(names(&["Paint_Peeling", "Wall_Crack"])).unwrap();
        assert_eq!(mapping.num_classes(), 2);
        assert_eq!(mapping.name(1), Some("Wall_Crack"));
        assert_eq!(mapping.name(2), None);
        assert_eq!(mapping.index_of("Paint_Peeling"), Some(0));
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert!(ClassMapping::new(vec![]).is_err());
        assert!(ClassMapping::new(names(&["a", "b", "a"])).is_err());
        assert!(ClassMapping::new(names(&["a", ""])).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mapping = ClassMapping::new(names(&["Electrical", "Flooring", "Plumbing"])).unwrap();
        mapping.save(&dir.path().join(CLASS_MAPPING_FILE)).unwrap();

        let loaded = ClassMapping::load(&dir.path().join(CLASS_MAPPING_FILE)).unwrap();
        assert_eq!(loaded, mapping);
        assert_eq!(loaded.version, CLASS_MAPPING_VERSION);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClassMapping::load(&dir.path().join(CLASS_MAPPING_FILE)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_load_rejects_future_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CLASS_MAPPING_FILE);
        fs::write(&path, r#"{"version": 99, "classes": ["a"]}"#).unwrap();
        assert!(matches!(ClassMapping::load(&path), Err(Error::Config(_))));
    }
}
