//! Inference module for single-image prediction
//!
//! A `Predictor` owns a model loaded from a combined artifact and applies the
//! artifact's preprocessing recipe, so served predictions see exactly the
//! input pipeline used during training.

pub mod predictor;

pub use predictor::{PredictionResponse, PredictionResult, Predictor};
