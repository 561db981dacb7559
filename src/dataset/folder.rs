//! Directory-backed image dataset
//!
//! Reads `<split_dir>/<class>/<image>` and assigns label indices from the
//! class ordering. Samples keep only the path; pixels are decoded per batch.

use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::dataset::labels::ClassLabels;
use crate::utils::error::{FundusError, Result};

/// Extensions accepted as images (lowercase)
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// A file reference plus its class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: usize,
    pub class_name: String,
}

/// All images of one split directory, ordered by class index then file name
#[derive(Debug, Clone)]
pub struct FolderDataset {
    root: PathBuf,
    labels: ClassLabels,
    samples: Vec<ImageSample>,
}

impl FolderDataset {
    /// Scan a split directory, discovering its classes from the subdirectories
    pub fn open(root: &Path) -> Result<Self> {
        let labels = ClassLabels::discover(root)?;
        Self::with_labels(root, labels)
    }

    /// Scan a split directory using a known class ordering
    ///
    /// A class without a directory contributes no samples. Subdirectories that
    /// are not in `labels` are ignored with a warning.
    pub fn with_labels(root: &Path, labels: ClassLabels) -> Result<Self> {
        if !root.is_dir() {
            return Err(FundusError::Dataset(format!(
                "Split directory does not exist: {:?}",
                root
            )));
        }

        if let Ok(found) = ClassLabels::discover(root) {
            for name in found.iter().filter(|n| labels.index_of(n).is_none()) {
                warn!("Ignoring unknown class directory '{}' in {:?}", name, root);
            }
        }

        let mut samples = Vec::new();
        for (label, class_name) in labels.iter().enumerate() {
            let class_dir = root.join(class_name);
            if !class_dir.is_dir() {
                debug!("No directory for class '{}' in {:?}", class_name, root);
                continue;
            }

            let mut paths: Vec<PathBuf> = WalkDir::new(&class_dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| is_image_file(p))
                .collect();
            paths.sort();

            debug!("Class '{}' (label {}): {} images", class_name, label, paths.len());
            samples.extend(paths.into_iter().map(|path| ImageSample {
                path,
                label,
                class_name: class_name.to_string(),
            }));
        }

        info!(
            "Found {} images belonging to {} classes in {:?}",
            samples.len(),
            labels.len(),
            root
        );

        Ok(Self {
            root: root.to_path_buf(),
            labels,
            samples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn labels(&self) -> &ClassLabels {
        &self.labels
    }

    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    /// Ground truth labels in stream order
    pub fn targets(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.label).collect()
    }

    /// Number of samples per class index
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.labels.len()];
        for s in &self.samples {
            counts[s.label] += 1;
        }
        counts
    }
}

impl Dataset<ImageSample> for FolderDataset {
    fn get(&self, index: usize) -> Option<ImageSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("a/b/eye.JPG")));
        assert!(is_image_file(Path::new("scan.tiff")));
        assert!(!is_image_file(Path::new("notes.txt")));
        assert!(!is_image_file(Path::new("noext")));
    }

    #[test]
    fn test_samples_sorted_by_class_then_name() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("normal"), "b.png");
        touch(&dir.path().join("normal"), "a.png");
        touch(&dir.path().join("cataract"), "z.jpg");
        touch(&dir.path().join("cataract"), "readme.md");

        let ds = FolderDataset::open(dir.path()).unwrap();
        let names: Vec<String> = ds
            .samples()
            .iter()
            .map(|s| s.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, ["z.jpg", "a.png", "b.png"]);
        assert_eq!(ds.targets(), vec![0, 1, 1]);
        assert_eq!(ds.class_counts(), vec![1, 2]);
        assert_eq!(ds.len(), 3);
    }

    #[test]
    fn test_with_labels_keeps_index_mapping() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("glaucoma"), "1.png");

        let labels = ClassLabels::new(vec![
            "cataract".into(),
            "diabetic_retinopathy".into(),
            "glaucoma".into(),
            "normal".into(),
        ])
        .unwrap();
        let ds = FolderDataset::with_labels(dir.path(), labels).unwrap();

        assert_eq!(ds.get(0).unwrap().label, 2);
        assert_eq!(ds.class_counts(), vec![0, 0, 1, 0]);
    }
}
