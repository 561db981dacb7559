//! Epoch-end callbacks for the training loop
//!
//! - `EarlyStopping`: halts on a `val_loss` plateau and restores the best weights
//! - `ModelCheckpoint`: persists weights whenever `val_accuracy` reaches a new best
//! - `ReduceLROnPlateau`: shrinks the learning rate on a `val_loss` plateau
//!
//! The three run in that order once per epoch and keep independent counters.

use serde::{Deserialize, Serialize};

/// Early stopping on validation loss
///
/// Generic over the snapshot type so the loop can keep a cloned model while
/// tests can track plain values.
#[derive(Debug)]
pub struct EarlyStopping<S> {
    patience: usize,
    best: f64,
    best_epoch: Option<usize>,
    wait: usize,
    snapshot: Option<S>,
    stopped_epoch: Option<usize>,
}

impl<S> EarlyStopping<S> {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::INFINITY,
            best_epoch: None,
            wait: 0,
            snapshot: None,
            stopped_epoch: None,
        }
    }

    /// Record one epoch. Returns `true` when training must stop.
    ///
    /// `snapshot` is only invoked on a strict improvement.
    pub fn on_epoch_end<F>(&mut self, epoch: usize, val_loss: f64, snapshot: F) -> bool
    where
        F: FnOnce() -> S,
    {
        if val_loss < self.best {
            self.best = val_loss;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            self.snapshot = Some(snapshot());
            return false;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            self.stopped_epoch = Some(epoch);
            return true;
        }
        false
    }

    /// Take the best snapshot, only if training was actually stopped
    pub fn restore_best(&mut self) -> Option<S> {
        self.stopped_epoch?;
        self.snapshot.take()
    }

    pub fn best_value(&self) -> f64 {
        self.best
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }

    pub fn wait(&self) -> usize {
        self.wait
    }
}

/// Tracks the best validation accuracy and decides when to write a checkpoint
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    best: f64,
    saves: usize,
}

impl Default for ModelCheckpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelCheckpoint {
    pub fn new() -> Self {
        Self {
            best: f64::NEG_INFINITY,
            saves: 0,
        }
    }

    /// Run `save` when `val_accuracy` is strictly above the best so far
    ///
    /// Returns whether a checkpoint was written.
    pub fn on_epoch_end<F, E>(&mut self, val_accuracy: f64, save: F) -> Result<bool, E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        if val_accuracy > self.best {
            save()?;
            self.best = val_accuracy;
            self.saves += 1;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn saves(&self) -> usize {
        self.saves
    }
}

/// Settings for `ReduceLROnPlateau`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateauConfig {
    pub factor: f64,
    pub patience: usize,
    pub min_delta: f64,
    pub min_lr: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            factor: 0.2,
            patience: 3,
            min_delta: 1e-4,
            min_lr: 1e-6,
        }
    }
}

/// Learning rate reduction on a validation loss plateau
#[derive(Debug, Clone)]
pub struct ReduceLROnPlateau {
    config: PlateauConfig,
    best: f64,
    wait: usize,
    current_lr: f64,
}

impl ReduceLROnPlateau {
    pub fn new(initial_lr: f64, config: PlateauConfig) -> Self {
        Self {
            config,
            best: f64::INFINITY,
            wait: 0,
            current_lr: initial_lr,
        }
    }

    /// Step with the epoch's validation loss
    ///
    /// Returns `Some((old, new))` when the rate was reduced.
    pub fn step_with_metric(&mut self, val_loss: f64) -> Option<(f64, f64)> {
        if val_loss < self.best - self.config.min_delta {
            self.best = val_loss;
            self.wait = 0;
            return None;
        }

        self.wait += 1;
        if self.wait < self.config.patience || self.current_lr <= self.config.min_lr {
            return None;
        }

        let old = self.current_lr;
        self.current_lr = (old * self.config.factor).max(self.config.min_lr);
        self.wait = 0;
        Some((old, self.current_lr))
    }

    pub fn get_lr(&self) -> f64 {
        self.current_lr
    }

    pub fn wait(&self) -> usize {
        self.wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_early_stopping_plateau_restores_best_epoch() {
        let mut es = EarlyStopping::new(5);
        // best at epoch 2, then exactly `patience` non-improving epochs
        let losses = [1.0, 0.8, 0.6, 0.6, 0.7, 0.65, 0.9, 0.61];
        let mut stopped_at = None;

        for (epoch, &loss) in losses.iter().enumerate() {
            if es.on_epoch_end(epoch, loss, || format!("weights@{}", epoch)) {
                stopped_at = Some(epoch);
                break;
            }
        }

        assert_eq!(stopped_at, Some(7));
        assert_eq!(es.best_epoch(), Some(2));
        assert_eq!(es.restore_best().as_deref(), Some("weights@2"));
    }

    #[test]
    fn test_early_stopping_equal_value_is_not_improvement() {
        let mut es = EarlyStopping::new(2);
        assert!(!es.on_epoch_end(0, 0.5, || 0));
        assert!(!es.on_epoch_end(1, 0.5, || 1));
        assert!(es.on_epoch_end(2, 0.5, || 2));
        assert_eq!(es.restore_best(), Some(0));
    }

    #[test]
    fn test_early_stopping_without_stop_keeps_final_weights() {
        let mut es = EarlyStopping::new(3);
        for (epoch, loss) in [0.9, 0.7, 0.8].into_iter().enumerate() {
            assert!(!es.on_epoch_end(epoch, loss, || epoch));
        }
        assert_eq!(es.stopped_epoch(), None);
        assert_eq!(es.restore_best(), None);
    }

    #[test]
    fn test_early_stopping_snapshots_only_on_improvement() {
        let mut es = EarlyStopping::new(10);
        let mut calls = 0;
        for (epoch, loss) in [0.5, 0.6, 0.4, 0.4].into_iter().enumerate() {
            es.on_epoch_end(epoch, loss, || {
                calls += 1;
            });
        }
        assert_eq!(calls, 2);
        assert_eq!(es.wait(), 1);
    }

    #[test]
    fn test_checkpoint_saves_only_on_strict_improvement() {
        let mut cp = ModelCheckpoint::new();
        let mut written = Vec::new();

        for acc in [0.5, 0.5, 0.7, 0.6, 0.7, 0.8] {
            cp.on_epoch_end::<_, ()>(acc, || {
                written.push(acc);
                Ok(())
            })
            .unwrap();
        }

        assert_eq!(written, vec![0.5, 0.7, 0.8]);
        assert_eq!(cp.saves(), 3);
        assert!((cp.best() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_checkpoint_failed_save_keeps_previous_best() {
        let mut cp = ModelCheckpoint::new();
        let result = cp.on_epoch_end(0.9, || Err("disk full"));
        assert_eq!(result, Err("disk full"));
        assert_eq!(cp.saves(), 0);
        assert_eq!(cp.best(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_reduce_lr_after_patience_and_reset() {
        let mut sched = ReduceLROnPlateau::new(1e-4, PlateauConfig::default());

        assert_eq!(sched.step_with_metric(1.0), None);
        assert_eq!(sched.step_with_metric(1.0), None);
        // below min_delta does not count as improvement
        assert_eq!(sched.step_with_metric(0.99995), None);
        let (old, new) = sched.step_with_metric(1.0).unwrap();
        assert!((old - 1e-4).abs() < 1e-15);
        assert!((new - 2e-5).abs() < 1e-15);
        assert_eq!(sched.wait(), 0);

        // counter restarted: two more plateau epochs are not enough
        assert_eq!(sched.step_with_metric(1.0), None);
        assert_eq!(sched.step_with_metric(1.0), None);
        assert!(sched.step_with_metric(1.0).is_some());
        assert!((sched.get_lr() - 4e-6).abs() < 1e-15);
    }

    #[test]
    fn test_reduce_lr_respects_min_lr() {
        let config = PlateauConfig {
            patience: 1,
            ..PlateauConfig::default()
        };
        let mut sched = ReduceLROnPlateau::new(2e-6, config);

        sched.step_with_metric(1.0);
        let (_, new) = sched.step_with_metric(1.0).unwrap();
        assert!((new - 1e-6).abs() < 1e-18);

        assert_eq!(sched.step_with_metric(1.0), None);
        assert!((sched.get_lr() - 1e-6).abs() < 1e-18);
    }

    #[test]
    fn test_improvement_resets_plateau_counter() {
        let mut sched = ReduceLROnPlateau::new(1e-3, PlateauConfig::default());
        sched.step_with_metric(1.0);
        sched.step_with_metric(1.0);
        sched.step_with_metric(1.0);
        assert_eq!(sched.wait(), 2);
        sched.step_with_metric(0.5);
        assert_eq!(sched.wait(), 0);
        assert!((sched.get_lr() - 1e-3).abs() < 1e-15);
    }
}
