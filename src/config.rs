//! Pipeline configuration loaded from TOML
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration. The CLI loads one `PipelineConfig`, applies its flag
//! overrides and hands each section to the component it configures.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::{
    AugmentationConfig, ClassLabels, Normalization, PreprocessRecipe, ResizeFilter, SplitConfig,
    DEFAULT_IMAGE_SIZE,
};
use crate::model::FundusClassifierConfig;
use crate::training::TrainingConfig;
use crate::utils::error::{FundusError, Result};

/// Full configuration of a split/train/evaluate run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dataset: DatasetSection,
    pub split: SplitConfig,
    pub augmentation: AugmentationConfig,
    pub model: ModelSection,
    pub training: TrainingConfig,
    pub output: OutputSection,
}

/// `[dataset]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSection {
    /// Directory holding one subdirectory per class
    pub root: PathBuf,
    /// Explicit class ordering. Discovered from `root` when absent.
    pub classes: Option<Vec<String>>,
    pub image_size: u32,
    pub resize_filter: ResizeFilter,
    pub normalization: Normalization,
}

impl Default for DatasetSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/fundus"),
            classes: None,
            image_size: DEFAULT_IMAGE_SIZE,
            resize_filter: ResizeFilter::default(),
            normalization: Normalization::default(),
        }
    }
}

/// `[model]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub width_multiplier: f64,
    pub hidden_units: usize,
    pub dropout_rate: f64,
    /// Burn record with pretrained MobileNetV2 weights
    pub pretrained_weights: Option<PathBuf>,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            width_multiplier: 1.0,
            hidden_units: 128,
            dropout_rate: 0.2,
            pretrained_weights: None,
        }
    }
}

/// `[output]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub dir: PathBuf,
    /// File stem of the saved model artifacts
    pub model_stem: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            model_stem: "eye_disease_model".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Read and validate a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FundusError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| FundusError::Config(format!("{:?}: {}", path, e)))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| FundusError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| FundusError::Config(format!("Failed to serialize config: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Split ratios are left to `DatasetSplitter`, which skips the split
    /// step when they are invalid.
    pub fn validate(&self) -> Result<()> {
        self.training.validate()?;
        if self.dataset.image_size < 32 {
            return Err(FundusError::Config(format!(
                "dataset.image_size must be at least 32, got {}",
                self.dataset.image_size
            )));
        }
        if !(0.0..1.0).contains(&self.model.dropout_rate) {
            return Err(FundusError::Config(format!(
                "model.dropout_rate must be in [0, 1), got {}",
                self.model.dropout_rate
            )));
        }
        if self.model.width_multiplier <= 0.0 || self.model.hidden_units == 0 {
            return Err(FundusError::Config(
                "model.width_multiplier and model.hidden_units must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Preprocessing shared by training, evaluation and serving
    pub fn recipe(&self) -> PreprocessRecipe {
        PreprocessRecipe {
            image_height: self.dataset.image_size,
            image_width: self.dataset.image_size,
            resize_filter: self.dataset.resize_filter,
            normalization: self.dataset.normalization,
        }
    }

    /// Configured class ordering, or the sorted class directories of the root
    pub fn labels(&self) -> Result<ClassLabels> {
        match &self.dataset.classes {
            Some(classes) => ClassLabels::new(classes.clone()),
            None => ClassLabels::discover(&self.dataset.root),
        }
    }

    pub fn classifier(&self, num_classes: usize) -> FundusClassifierConfig {
        FundusClassifierConfig::new()
            .with_num_classes(num_classes)
            .with_width_multiplier(self.model.width_multiplier)
            .with_hidden_units(self.model.hidden_units)
            .with_dropout_rate(self.model.dropout_rate)
            .with_pretrained_weights(self.model.pretrained_weights.clone())
    }
}
