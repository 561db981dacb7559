//! Shared state for the prediction server
//!
//! One predictor is loaded at startup and lives for the whole process. The
//! mutex serializes forward passes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Context;
use chrono::{DateTime, Utc};
use fundus_classifier::backend::{default_device, DefaultBackend};
use fundus_classifier::inference::{PredictionResult, Predictor};
use tracing::warn;

/// Everything a request handler needs
///
/// Inference never mutates the predictor, so a lock poisoned by a panicking
/// request is taken over rather than failing every later request.
pub struct ServiceContext {
    predictor: Mutex<Predictor<DefaultBackend>>,
    labels: Vec<String>,
    input_shape: [usize; 3],
    model_path: Option<PathBuf>,
    loaded_at: DateTime<Utc>,
    started_at: Instant,
}

impl ServiceContext {
    pub fn new(predictor: Predictor<DefaultBackend>, model_path: Option<PathBuf>) -> Self {
        let labels = predictor.labels().names().to_vec();
        let input_shape = predictor.recipe().input_shape();
        Self {
            predictor: Mutex::new(predictor),
            labels,
            input_shape,
            model_path,
            loaded_at: Utc::now(),
            started_at: Instant::now(),
        }
    }

    /// Load the combined artifact and check it against the expected labels
    pub fn load(model_path: &Path, expected_labels: Option<&[String]>) -> anyhow::Result<Self> {
        let predictor = Predictor::<DefaultBackend>::load(model_path, default_device())
            .with_context(|| format!("Failed to load model artifact {:?}", model_path))?;

        if let Some(expected) = expected_labels {
            predictor
                .labels()
                .verify(expected)
                .context("Artifact labels do not match FUNDUS_LABELS")?;
        }

        Ok(Self::new(predictor, Some(model_path.to_path_buf())))
    }

    /// Classify one encoded image. Blocks while another request holds the model.
    pub fn predict(&self, bytes: &[u8]) -> anyhow::Result<PredictionResult> {
        let predictor = self.predictor.lock().unwrap_or_else(|poisoned| {
            warn!("Predictor lock was poisoned by an earlier panic, recovering");
            poisoned.into_inner()
        });
        predictor
            .predict_bytes(bytes)
            .context("Failed to classify uploaded image")
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn input_shape(&self) -> [usize; 3] {
        self.input_shape
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedContext = Arc<ServiceContext>;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    use fundus_classifier::artifact::ArtifactManifest;
    use fundus_classifier::dataset::{ClassLabels, PreprocessRecipe, DEFAULT_CLASSES};
    use fundus_classifier::model::FundusClassifierConfig;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    /// Untrained four-class model on 32x32 inputs
    pub fn tiny_context() -> SharedContext {
        let config = FundusClassifierConfig::new()
            .with_num_classes(DEFAULT_CLASSES.len())
            .with_width_multiplier(0.35)
            .with_hidden_units(8);
        let labels =
            ClassLabels::new(DEFAULT_CLASSES.iter().map(|s| s.to_string()).collect()).unwrap();
        let device = default_device();
        let model = config.init::<DefaultBackend>(&device).unwrap();
        let manifest = ArtifactManifest::new(config, labels, PreprocessRecipe::square(32));
        let predictor = Predictor::new(model, manifest, device).unwrap();
        Arc::new(ServiceContext::new(predictor, None))
    }

    pub fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_fn(64, 48, |x, y| Rgb([x as u8 * 3, 120, y as u8 * 4]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_predict_after_poisoned_lock() {
        let ctx = tiny_context();

        let holder = Arc::clone(&ctx);
        let panicked = std::thread::spawn(move || {
            let _guard = holder.predictor.lock().unwrap();
            panic!("request panicked while holding the model");
        })
        .join();
        assert!(panicked.is_err());
        assert!(ctx.predictor.is_poisoned());

        let result = ctx.predict(&png_bytes()).unwrap();
        assert_eq!(result.probabilities.len(), DEFAULT_CLASSES.len());
        assert!(ctx.predict(&png_bytes()).is_ok());
    }

    #[test]
    fn test_load_rejects_mismatched_labels() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("model_complete.bin");
        let ctx = tiny_context();
        {
            let predictor = ctx.predictor.lock().unwrap();
            let bytes = fundus_classifier::artifact::encode_complete(
                predictor.model(),
                predictor.manifest(),
            )
            .unwrap();
            std::fs::write(&path, bytes).unwrap();
        }

        assert!(ServiceContext::load(&path, None).is_ok());
        let expected: Vec<String> = DEFAULT_CLASSES.iter().rev().map(|s| s.to_string()).collect();
        assert!(ServiceContext::load(&path, Some(&expected)).is_err());
        assert!(ServiceContext::load(&dir.path().join("missing.bin"), None).is_err());
    }
}
