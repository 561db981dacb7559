//! Training module for the transfer-learning head
//!
//! This module provides:
//! - The epoch loop over Burn's autodiff backend
//! - Early stopping, best-accuracy checkpointing and learning rate
//!   reduction on plateau
//! - Per-epoch history for reports and charts
//!
//! ## Procedure
//!
//! 1. Run the frozen backbone and train the head for one epoch
//! 2. Measure loss and accuracy on the validation split
//! 3. Run the callbacks: EarlyStopping, ModelCheckpoint, ReduceLROnPlateau
//! 4. Repeat until the epoch limit or early stopping

pub mod callbacks;
pub mod trainer;

pub use callbacks::{EarlyStopping, ModelCheckpoint, PlateauConfig, ReduceLROnPlateau};
pub use trainer::{
    steps_per_epoch, EpochMetrics, StopReason, Trainer, TrainingConfig, TrainingHistory,
    TrainingOutcome, TrainingState,
};
