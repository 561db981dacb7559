//! # Fundus Classifier
//!
//! Eye-fundus image classification by transfer learning, built on the Burn
//! framework. A frozen MobileNetV2 backbone feeds a small trainable head that
//! sorts retina photographs into cataract, diabetic retinopathy, glaucoma and
//! normal (or any other class set found on disk).
//!
//! ## Modules
//!
//! - `dataset`: class discovery, train/validation/test splitting, preprocessing,
//!   augmentation and Burn batch streams
//! - `model`: MobileNetV2 backbone and classification head
//! - `training`: the epoch loop with early stopping, checkpointing and
//!   learning rate reduction on plateau
//! - `evaluation`: held-out metrics, confusion matrix and reports
//! - `artifact`: saving and loading self-contained model files
//! - `inference`: single-image prediction with the artifact's recipe
//! - `config`: TOML pipeline configuration
//! - `utils`: logging, metrics, charts and errors
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fundus_classifier::{artifact, inference::Predictor};
//!
//! let predictor = Predictor::<NdArray>::load(Path::new("output/eye_disease_model_complete.bin"), device)?;
//! let result = predictor.predict_path(Path::new("retina.jpg"))?;
//! println!("{}", result.display());
//! ```

pub mod artifact;
pub mod backend;
pub mod config;
pub mod dataset;
pub mod evaluation;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use artifact::{load_complete, save_artifacts, ArtifactManifest, ArtifactPaths};
pub use config::PipelineConfig;
pub use dataset::{
    ClassLabels, DatasetSplitter, FolderDataset, FundusBatch, FundusBatcher, FundusDataLoader,
    PreprocessRecipe, SplitConfig,
};
pub use evaluation::{EvaluationReport, Evaluator};
pub use inference::{PredictionResult, Predictor};
pub use model::{FundusClassifier, FundusClassifierConfig};
pub use training::{Trainer, TrainingConfig, TrainingHistory, TrainingState};
pub use utils::error::{FundusError, Result, Severity};
pub use utils::metrics::{ConfusionMatrix, Metrics};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
