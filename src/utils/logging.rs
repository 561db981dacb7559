//! Logging Module
//!
//! Structured logging with `tracing`. `RUST_LOG` takes precedence over the
//! configured level when it is set.

use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::utils::error::{FundusError, Result};
use crate::utils::format_duration;

/// How the CLI subscriber renders events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    /// Fallback when `RUST_LOG` is unset
    pub level: Level,
    /// Print module paths and thread ids
    pub detailed: bool,
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            detailed: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// `-v` on the command line
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            detailed: true,
            ..Self::default()
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_lowercase()))
    }
}

/// Install the global subscriber. Fails if one is already set.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(config.filter())
        .with_ansi(config.ansi_colors)
        .with_target(config.detailed)
        .with_thread_ids(config.detailed)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| FundusError::Config(format!("Failed to initialize logging: {}", e)))
}

/// Per-epoch timing and metric lines for the training loop
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: std::time::Instant,
    training_start: std::time::Instant,
}

impl TrainingLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: std::time::Instant::now(),
            training_start: std::time::Instant::now(),
        }
    }

    /// Log start of an epoch (0-based)
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = std::time::Instant::now();
        tracing::debug!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Log end of an epoch with its metrics
    pub fn end_epoch(
        &self,
        train_loss: f64,
        train_accuracy: f64,
        val_loss: f64,
        val_accuracy: f64,
        learning_rate: f64,
    ) {
        let epoch_time = self.epoch_start.elapsed().as_secs_f64();
        let avg_epoch_time =
            self.training_start.elapsed().as_secs_f64() / (self.epoch + 1) as f64;
        let remaining = self.total_epochs.saturating_sub(self.epoch + 1);

        tracing::info!(
            "Epoch {}/{} ({}) | loss {:.4} acc {:.2}% | val_loss {:.4} val_acc {:.2}% | lr {:.2e} | ETA {}",
            self.epoch + 1,
            self.total_epochs,
            format_duration(epoch_time),
            train_loss,
            train_accuracy * 100.0,
            val_loss,
            val_accuracy * 100.0,
            learning_rate,
            format_duration(remaining as f64 * avg_epoch_time)
        );
    }

    pub fn log_checkpoint(&self, val_accuracy: f64) {
        tracing::info!(
            "val_accuracy improved to {:.2}%, checkpoint saved",
            val_accuracy * 100.0
        );
    }

    pub fn log_lr_reduced(&self, from: f64, to: f64) {
        tracing::info!("ReduceLROnPlateau: learning rate {:.2e} -> {:.2e}", from, to);
    }

    pub fn log_early_stop(&self, patience: usize, best_epoch: usize) {
        tracing::warn!(
            "Early stopping: val_loss did not improve for {} epochs, restoring weights from epoch {}",
            patience,
            best_epoch + 1
        );
    }

    /// Log training completion
    pub fn log_complete(&self, epochs_run: usize, best_val_accuracy: f64) {
        tracing::info!(
            "Training complete: {} epochs in {} | best val_accuracy {:.2}%",
            epochs_run,
            format_duration(self.training_start.elapsed().as_secs_f64()),
            best_val_accuracy * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_config() {
        let config = LogConfig::verbose();
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.detailed);
        assert_eq!(LogConfig::default().level, Level::INFO);
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_logging(&LogConfig::default());
        assert!(init_logging(&LogConfig::default()).is_err());
    }
}
