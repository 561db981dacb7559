//! Inference Predictor Module
//!
//! Runs a trained classifier on single images using the preprocessing recipe
//! stored in its artifact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::prelude::*;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifact::{load_complete, ArtifactManifest};
use crate::dataset::preprocess::{decode_bytes, load_image};
use crate::dataset::{ClassLabels, PreprocessRecipe};
use crate::model::FundusClassifier;
use crate::utils::error::{FundusError, Result};
use crate::utils::metrics::{argmax, softmax};
use crate::utils::tensor::float_rows;

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Path to the input image (if applicable)
    pub image_path: Option<PathBuf>,

    /// Predicted class index
    pub class_index: usize,

    /// Predicted class name
    pub predicted_class: String,

    /// Probability of the predicted class, in `[0, 1]`
    pub confidence: f32,

    /// `(label, probability)` for every class, in label order
    pub probabilities: Vec<(String, f32)>,

    /// Inference time in milliseconds
    pub inference_time_ms: f64,
}

/// Wire form of a prediction, with percentages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predicted_class: String,
    /// Percentage in `[0, 100]`
    pub confidence: f64,
    pub all_probabilities: BTreeMap<String, f64>,
}

impl PredictionResult {
    fn new(probabilities: Vec<f32>, labels: &ClassLabels, elapsed_ms: f64) -> Self {
        let class_index = argmax(&probabilities);
        let confidence = probabilities.get(class_index).copied().unwrap_or(0.0);
        let probabilities = labels
            .iter()
            .zip(probabilities)
            .map(|(name, p)| (name.to_string(), p))
            .collect();

        Self {
            image_path: None,
            class_index,
            predicted_class: labels.name(class_index).unwrap_or("unknown").to_string(),
            confidence,
            probabilities,
            inference_time_ms: elapsed_ms,
        }
    }

    fn with_path(mut self, path: &Path) -> Self {
        self.image_path = Some(path.to_path_buf());
        self
    }

    /// Percent view used by the HTTP API
    pub fn to_response(&self) -> PredictionResponse {
        PredictionResponse {
            predicted_class: self.predicted_class.clone(),
            confidence: self.confidence as f64 * 100.0,
            all_probabilities: self
                .probabilities
                .iter()
                .map(|(name, p)| (name.clone(), *p as f64 * 100.0))
                .collect(),
        }
    }

    /// Pretty print the prediction result
    pub fn display(&self) -> String {
        let mut output = String::new();

        if let Some(path) = &self.image_path {
            output.push_str(&format!("Image: {:?}\n", path));
        }
        output.push_str(&format!(
            "Prediction: {} (class {})\n",
            self.predicted_class, self.class_index
        ));
        output.push_str(&format!("Confidence: {:.2}%\n", self.confidence * 100.0));
        output.push_str(&format!("Inference time: {:.2} ms\n", self.inference_time_ms));

        output.push_str("\nAll probabilities:\n");
        for (name, prob) in &self.probabilities {
            output.push_str(&format!("  {:<24} {:>6.2}%\n", name, prob * 100.0));
        }
        output
    }
}

/// A loaded model plus the manifest it was saved with
pub struct Predictor<B: Backend> {
    model: FundusClassifier<B>,
    manifest: ArtifactManifest,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    pub fn new(model: FundusClassifier<B>, manifest: ArtifactManifest, device: B::Device) -> Result<Self> {
        manifest.validate()?;
        if model.num_classes() != manifest.labels.len() {
            return Err(FundusError::Artifact(format!(
                "Model has {} outputs but {} labels were supplied",
                model.num_classes(),
                manifest.labels.len()
            )));
        }
        Ok(Self {
            model,
            manifest,
            device,
        })
    }

    /// Load from a combined artifact file
    pub fn load(path: &Path, device: B::Device) -> Result<Self> {
        let (model, manifest) = load_complete::<B>(path, &device)?;
        Self::new(model, manifest, device)
    }

    pub fn model(&self) -> &FundusClassifier<B> {
        &self.model
    }

    pub fn labels(&self) -> &ClassLabels {
        &self.manifest.labels
    }

    pub fn manifest(&self) -> &ArtifactManifest {
        &self.manifest
    }

    pub fn recipe(&self) -> &PreprocessRecipe {
        &self.manifest.recipe
    }

    /// Classify an encoded image (PNG, JPEG, ...)
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<PredictionResult> {
        let img = decode_bytes(bytes)?;
        self.predict_image(&img)
    }

    /// Classify an image file
    pub fn predict_path(&self, path: &Path) -> Result<PredictionResult> {
        let img = load_image(path)?;
        Ok(self.predict_image(&img)?.with_path(path))
    }

    /// Classify an already decoded image
    pub fn predict_image(&self, img: &DynamicImage) -> Result<PredictionResult> {
        let start = Instant::now();
        let recipe = self.recipe();
        let [channels, height, width] = recipe.input_shape();

        let input = Tensor::<B, 4>::from_floats(
            TensorData::new(recipe.apply(img), [1, channels, height, width]),
            &self.device,
        );
        let logits = self.model.forward(input);
        let row = float_rows(logits)
            .map_err(|e| FundusError::Inference(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| FundusError::Inference("Model produced no output".to_string()))?;

        let probabilities = softmax(&row);
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(FundusError::Inference(
                "Model produced non-finite scores".to_string(),
            ));
        }

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let result = PredictionResult::new(probabilities, self.labels(), elapsed_ms);
        debug!(
            "Predicted {} ({:.2}%) in {:.1} ms",
            result.predicted_class,
            result.confidence * 100.0,
            elapsed_ms
        );
        Ok(result)
    }
}
