//! Dataset module for fundus image data handling
//!
//! This module provides functionality for:
//! - Discovering and persisting the class-label ordering
//! - Splitting a per-class image pool into train/validation/test directories
//! - Deterministic preprocessing and random training augmentation
//! - Burn batch streams over a split directory

pub mod augmentation;
pub mod burn_dataset;
pub mod folder;
pub mod labels;
pub mod preprocess;
pub mod split;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{FundusBatch, FundusBatcher, FundusDataLoader, FundusItem};
pub use folder::{FolderDataset, ImageSample};
pub use labels::ClassLabels;
pub use preprocess::{Normalization, PreprocessRecipe, ResizeFilter};
pub use split::{DatasetSplit, DatasetSplitter, SplitConfig, SplitCounts, SplitOutcome};

/// Default class set of the fundus dataset
pub const DEFAULT_CLASSES: [&str; 4] = ["cataract", "diabetic_retinopathy", "glaucoma", "normal"];

/// Default square input size
pub const DEFAULT_IMAGE_SIZE: u32 = 256;
