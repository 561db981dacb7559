//! Held-out evaluation of a trained classifier

use std::path::{Path, PathBuf};

use burn::{nn::loss::CrossEntropyLossConfig, prelude::*, tensor::ElementConversion};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::FundusDataLoader;
use crate::model::FundusClassifier;
use crate::utils::charts::generate_confusion_heatmap;
use crate::utils::error::{FundusError, Result};
use crate::utils::metrics::{Metrics, WeightedAverage};
use crate::utils::tensor;

/// Output of one evaluation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Directory that was evaluated
    pub split_dir: PathBuf,
    pub class_names: Vec<String>,
    pub metrics: Metrics,
    /// Number of samples found on disk
    pub samples_on_disk: usize,
}

impl EvaluationReport {
    pub fn loss(&self) -> f64 {
        self.metrics.loss.unwrap_or(f64::NAN)
    }

    pub fn accuracy(&self) -> f64 {
        self.metrics.accuracy
    }

    pub fn classification_report(&self) -> String {
        self.metrics.classification_report()
    }

    /// Write `evaluation.json`, `classification_report.txt`,
    /// `confusion_matrix.csv` and `confusion_matrix.svg` into `dir`
    pub fn write_reports(&self, dir: &Path) -> Result<EvaluationPaths> {
        std::fs::create_dir_all(dir)?;
        let paths = EvaluationPaths::in_dir(dir);

        std::fs::write(&paths.json, serde_json::to_string_pretty(self)?)?;
        std::fs::write(&paths.report, self.classification_report())?;
        self.metrics
            .confusion_matrix
            .save_csv(&paths.confusion_csv, &self.class_names)?;
        generate_confusion_heatmap(
            &self.metrics.confusion_matrix,
            &self.class_names,
            &paths.confusion_svg,
        )?;

        info!("Evaluation reports written to {:?}", dir);
        Ok(paths)
    }
}

/// Files produced by `EvaluationReport::write_reports`
#[derive(Debug, Clone)]
pub struct EvaluationPaths {
    pub json: PathBuf,
    pub report: PathBuf,
    pub confusion_csv: PathBuf,
    pub confusion_svg: PathBuf,
}

impl EvaluationPaths {
    fn in_dir(dir: &Path) -> Self {
        Self {
            json: dir.join("evaluation.json"),
            report: dir.join("classification_report.txt"),
            confusion_csv: dir.join("confusion_matrix.csv"),
            confusion_svg: dir.join("confusion_matrix.svg"),
        }
    }
}

/// Runs a model over an ordered evaluation stream
pub struct Evaluator;

impl Evaluator {
    /// Loss, accuracy, confusion matrix and per-class metrics
    ///
    /// Predictions are matched to ground truth by position in the unshuffled
    /// stream. Ground truth is cut to the number of predictions produced.
    pub fn evaluate<B: Backend>(
        model: &FundusClassifier<B>,
        loader: &FundusDataLoader<B>,
    ) -> Result<EvaluationReport> {
        let dataset = loader.dataset();
        let labels = dataset.labels();
        if labels.len() != model.num_classes() {
            return Err(FundusError::Dataset(format!(
                "Dataset at {:?} has {} classes but the model predicts {}",
                dataset.root(),
                labels.len(),
                model.num_classes()
            )));
        }
        if dataset.samples().is_empty() {
            return Err(FundusError::Dataset(format!(
                "No images to evaluate in {:?}",
                dataset.root()
            )));
        }

        let mut loss = WeightedAverage::new();
        let mut predictions = Vec::with_capacity(dataset.samples().len());

        for batch in loader.iter(0) {
            let batch = batch?;
            let batch_size = batch.len();

            let logits = model.forward(batch.images);
            let loss_fn = CrossEntropyLossConfig::new().init(&logits.device());
            let batch_loss = loss_fn
                .forward(logits.clone(), batch.targets)
                .into_scalar()
                .elem::<f64>();

            loss.add(batch_loss, batch_size);
            predictions.extend(tensor::argmax_rows(logits)?);
        }

        let mut ground_truth = dataset.targets();
        if ground_truth.len() != predictions.len() {
            warn!(
                "Produced {} predictions for {} samples, truncating ground truth",
                predictions.len(),
                ground_truth.len()
            );
        }
        ground_truth.truncate(predictions.len());

        let class_names = labels.names().to_vec();
        let metrics = Metrics::from_predictions(&predictions, &ground_truth, labels.len())
            .with_class_names(&class_names)
            .with_loss(loss.average());

        info!(
            "Evaluated {} samples: loss {:.4}, accuracy {:.2}%",
            metrics.total_samples,
            loss.average(),
            metrics.accuracy * 100.0
        );

        Ok(EvaluationReport {
            split_dir: dataset.root().to_path_buf(),
            class_names,
            metrics,
            samples_on_disk: dataset.samples().len(),
        })
    }
}
