//! Canonical class-label ordering
//!
//! Output index `i` of a classifier always means `labels[i]`. The ordering is
//! discovered once from sorted directory names, persisted with the artifact,
//! and reused verbatim at serving time.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dataset::split::DatasetSplit;
use crate::utils::error::{FundusError, Result};

/// Ordered set of class names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassLabels {
    names: Vec<String>,
}

impl ClassLabels {
    /// Build from an explicit list. Rejects empty and duplicate lists.
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(FundusError::Config("Label list is empty".to_string()));
        }
        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(FundusError::Config(format!("Duplicate label '{}'", name)));
            }
        }
        Ok(Self { names })
    }

    /// Discover classes as the sorted subdirectory names of `dir`
    ///
    /// Split directory names (`train`, `validation`, `test`) are never classes,
    /// so calling this on an already split dataset root still works.
    pub fn discover(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(FundusError::Dataset(format!(
                "Dataset directory does not exist: {:?}",
                dir
            )));
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if DatasetSplit::from_dir_name(name).is_none() && !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        if names.is_empty() {
            return Err(FundusError::Dataset(format!(
                "No class directories found in {:?}",
                dir
            )));
        }
        Self::new(names)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Fail unless `expected` has exactly this ordering
    pub fn verify(&self, expected: &[String]) -> Result<()> {
        if self.names.as_slice() == expected {
            return Ok(());
        }
        Err(FundusError::Artifact(format!(
            "Label ordering mismatch: artifact has [{}], expected [{}]",
            self.names.join(", "),
            expected.join(", ")
        )))
    }
}

impl std::fmt::Display for ClassLabels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, name) in self.names.iter().enumerate() {
            writeln!(f, "  {:>2}: {}", i, name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discover_sorted_and_skips_split_dirs() {
        let dir = TempDir::new().unwrap();
        for name in ["normal", "cataract", "glaucoma", "train", "validation", "test"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("README.txt"), "not a class").unwrap();

        let labels = ClassLabels::discover(dir.path()).unwrap();
        assert_eq!(labels.names(), ["cataract", "glaucoma", "normal"]);
        assert_eq!(labels.index_of("normal"), Some(2));
        assert_eq!(labels.name(0), Some("cataract"));
    }

    #[test]
    fn test_discover_missing_dir() {
        let err = ClassLabels::discover(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, FundusError::Dataset(_)));
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        assert!(ClassLabels::new(vec![]).is_err());
        assert!(ClassLabels::new(vec!["a".into(), "a".into()]).is_err());
    }

    #[test]
    fn test_verify_ordering() {
        let labels = ClassLabels::new(vec!["cataract".into(), "normal".into()]).unwrap();
        assert!(labels.verify(&["cataract".into(), "normal".into()]).is_ok());
        let err = labels
            .verify(&["normal".into(), "cataract".into()])
            .unwrap_err();
        assert!(format!("{}", err).contains("mismatch"));
    }

    #[test]
    fn test_serializes_as_plain_list() {
        let labels = ClassLabels::new(vec!["a".into(), "b".into()]).unwrap();
        assert_eq!(serde_json::to_string(&labels).unwrap(), r#"["a","b"]"#);
    }
}
