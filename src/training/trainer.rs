//! Training loop for the classification head
//!
//! A hand-written loop over Burn primitives rather than `LearnerBuilder`:
//! each step runs the frozen backbone, the head forward pass, cross-entropy,
//! backward and one Adam step. Validation runs on the `valid()` model after
//! every epoch and feeds the callbacks.

use std::path::{Path, PathBuf};

use burn::{
    module::{AutodiffModule, Module},
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::CompactRecorder,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::FundusDataLoader;
use crate::model::FundusClassifier;
use crate::training::callbacks::{EarlyStopping, ModelCheckpoint, PlateauConfig, ReduceLROnPlateau};
use crate::utils::error::{FundusError, Result};
use crate::utils::format_number;
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{AccuracyTracker, WeightedAverage};
use crate::utils::tensor;

/// Hyperparameters of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub adam_epsilon: f64,
    /// Seed for shuffling and augmentation
    pub seed: u64,
    /// Epochs without a `val_loss` improvement before stopping
    pub early_stopping_patience: usize,
    pub reduce_lr: PlateauConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 32,
            learning_rate: 1e-4,
            adam_epsilon: 1e-7,
            seed: 42,
            early_stopping_patience: 5,
            reduce_lr: PlateauConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(FundusError::Config("epochs must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(FundusError::Config("batch_size must be at least 1".to_string()));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(FundusError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.reduce_lr.factor) {
            return Err(FundusError::Config(format!(
                "reduce_lr.factor must be in [0, 1), got {}",
                self.reduce_lr.factor
            )));
        }
        Ok(())
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    MaxEpochs,
    EarlyStopping,
}

/// Metrics of one finished epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    /// Learning rate used during the epoch
    pub lr: f64,
}

/// Per-epoch curves of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub accuracy: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_accuracy: Vec<f64>,
    pub lr: Vec<f64>,
    pub stop_reason: StopReason,
    /// Epoch (0-based) with the lowest `val_loss`
    pub best_epoch: Option<usize>,
}

impl TrainingHistory {
    pub fn record(&mut self, metrics: &EpochMetrics) {
        self.loss.push(metrics.loss);
        self.accuracy.push(metrics.accuracy);
        self.val_loss.push(metrics.val_loss);
        self.val_accuracy.push(metrics.val_accuracy);
        self.lr.push(metrics.lr);
    }

    pub fn epochs_run(&self) -> usize {
        self.loss.len()
    }

    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.val_accuracy.iter().copied().reduce(f64::max)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

/// Mutable progress of a run, owned by the `Trainer`
#[derive(Debug, Clone, Default)]
pub struct TrainingState {
    /// Current epoch (0-indexed)
    pub epoch: usize,
    /// Optimizer steps taken so far
    pub iteration: usize,
    pub samples_seen: usize,
    pub history: TrainingHistory,
}

/// Result of `Trainer::fit`
pub struct TrainingOutcome<B: AutodiffBackend> {
    pub model: FundusClassifier<B>,
    pub history: TrainingHistory,
}

/// Runs the epoch loop and its callbacks
pub struct Trainer<B: AutodiffBackend> {
    config: TrainingConfig,
    device: B::Device,
    checkpoint_path: Option<PathBuf>,
    show_progress: bool,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: TrainingConfig, device: B::Device) -> Self {
        Self {
            config,
            device,
            checkpoint_path: None,
            show_progress: true,
        }
    }

    /// Write the best `val_accuracy` weights here
    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train the head until the epoch limit or early stopping
    ///
    /// When early stopping fires the returned model carries the weights of
    /// the lowest `val_loss` epoch; otherwise it carries the final weights.
    pub fn fit(
        &self,
        mut model: FundusClassifier<B>,
        train: &FundusDataLoader<B>,
        valid: &FundusDataLoader<B::InnerBackend>,
    ) -> Result<TrainingOutcome<B>> {
        self.config.validate()?;
        for (split, loader_batch) in [("training", train.batch_size()), ("validation", valid.batch_size())] {
            if loader_batch != self.config.batch_size {
                return Err(FundusError::Config(format!(
                    "{} loader batches {} samples but training.batch_size is {}",
                    split, loader_batch, self.config.batch_size
                )));
            }
        }
        let train_steps = steps_per_epoch("training", train.dataset().samples().len(), train.batch_size())?;
        let valid_steps = steps_per_epoch("validation", valid.dataset().samples().len(), valid.batch_size())?;

        info!(
            "Trainable head parameters: {}, frozen backbone parameters: {}",
            format_number(model.head_param_count()),
            format_number(model.backbone_param_count())
        );
        info!(
            "Training for up to {} epochs: {} steps/epoch, {} validation steps",
            self.config.epochs, train_steps, valid_steps
        );

        let mut optimizer = AdamConfig::new()
            .with_beta_1(0.9)
            .with_beta_2(0.999)
            .with_epsilon(self.config.adam_epsilon as f32)
            .init();
        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);

        let mut state = TrainingState::default();
        let mut early_stopping = EarlyStopping::new(self.config.early_stopping_patience);
        let mut checkpoint = ModelCheckpoint::new();
        let mut scheduler = ReduceLROnPlateau::new(self.config.learning_rate, self.config.reduce_lr);
        let mut logger = TrainingLogger::new(self.config.epochs);

        for epoch in 0..self.config.epochs {
            state.epoch = epoch;
            logger.start_epoch(epoch);
            let lr = scheduler.get_lr();

            let progress = self.progress_bar(train_steps, epoch);
            let mut train_loss = WeightedAverage::new();
            let mut train_acc = AccuracyTracker::new();

            for batch in train.iter(epoch).take(train_steps) {
                let batch = batch?;
                let batch_size = batch.len();
                let targets = tensor::labels(batch.targets.clone())?;

                let logits = model.forward_frozen(batch.images);
                let loss = loss_fn.forward(logits.clone(), batch.targets);
                let loss_value = loss.clone().into_scalar().elem::<f64>();
                let predictions = tensor::argmax_rows(logits)?;

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(lr, model, grads);

                train_loss.add(loss_value, batch_size);
                train_acc.add_batch(&predictions, &targets);
                state.iteration += 1;
                state.samples_seen += batch_size;

                progress.inc(1);
                progress.set_message(format!("loss {:.4}", train_loss.average()));
            }
            progress.finish_and_clear();

            let (val_loss, val_accuracy) = validate(&model, valid, valid_steps)?;
            let metrics = EpochMetrics {
                loss: train_loss.average(),
                accuracy: train_acc.accuracy(),
                val_loss,
                val_accuracy,
                lr,
            };
            logger.end_epoch(metrics.loss, metrics.accuracy, val_loss, val_accuracy, lr);
            state.history.record(&metrics);

            let stop = early_stopping.on_epoch_end(epoch, val_loss, || model.clone());
            if checkpoint.on_epoch_end(val_accuracy, || self.save_checkpoint(&model))? {
                logger.log_checkpoint(val_accuracy);
            }
            if let Some((from, to)) = scheduler.step_with_metric(val_loss) {
                logger.log_lr_reduced(from, to);
            }

            if stop {
                let best_epoch = early_stopping.best_epoch().unwrap_or(epoch);
                logger.log_early_stop(self.config.early_stopping_patience, best_epoch);
                if let Some(best) = early_stopping.restore_best() {
                    model = best;
                }
                state.history.stop_reason = StopReason::EarlyStopping;
                break;
            }
        }

        state.history.best_epoch = early_stopping.best_epoch();
        logger.log_complete(
            state.history.epochs_run(),
            state.history.best_val_accuracy().unwrap_or(0.0),
        );
        debug!(
            "{} optimizer steps over {} samples",
            state.iteration, state.samples_seen
        );

        Ok(TrainingOutcome {
            model,
            history: state.history,
        })
    }

    fn save_checkpoint(&self, model: &FundusClassifier<B>) -> Result<()> {
        let Some(path) = &self.checkpoint_path else {
            return Ok(());
        };
        model
            .clone()
            .save_file(path.clone(), &CompactRecorder::new())
            .map_err(|e| {
                FundusError::Record(format!("Failed to save checkpoint to {:?}: {:?}", path, e))
            })?;
        debug!("Checkpoint written to {:?}", path);
        Ok(())
    }

    fn progress_bar(&self, steps: usize, epoch: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let progress = ProgressBar::new(steps as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} steps {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        progress.set_prefix(format!("epoch {}", epoch + 1));
        progress
    }
}

/// `floor(samples / batch_size)`, refusing a split smaller than one batch
pub fn steps_per_epoch(split: &str, samples: usize, batch_size: usize) -> Result<usize> {
    let steps = samples / batch_size.max(1);
    if steps == 0 {
        return Err(FundusError::Training(format!(
            "{} split has {} samples, fewer than one batch of {}",
            split, samples, batch_size
        )));
    }
    Ok(steps)
}

/// Mean loss and accuracy over `steps` full validation batches
fn validate<B: AutodiffBackend>(
    model: &FundusClassifier<B>,
    valid: &FundusDataLoader<B::InnerBackend>,
    steps: usize,
) -> Result<(f64, f64)> {
    let model = model.valid();
    let mut loss = WeightedAverage::new();
    let mut accuracy = AccuracyTracker::new();

    for batch in valid.iter(0).take(steps) {
        let batch = batch?;
        let batch_size = batch.len();
        let targets = tensor::labels(batch.targets.clone())?;

        let logits = model.forward(batch.images);
        let loss_fn = CrossEntropyLossConfig::new().init(&logits.device());
        let batch_loss = loss_fn
            .forward(logits.clone(), batch.targets)
            .into_scalar()
            .elem::<f64>();

        loss.add(batch_loss, batch_size);
        accuracy.add_batch(&tensor::argmax_rows(logits)?, &targets);
    }

    Ok((loss.average(), accuracy.accuracy()))
}
