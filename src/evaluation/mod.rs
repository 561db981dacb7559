//! Evaluation of a trained classifier on a held-out split
//!
//! Produces loss, accuracy, a confusion matrix and a per-class report, and
//! writes them next to the model artifacts.

pub mod evaluator;

pub use evaluator::{EvaluationPaths, EvaluationReport, Evaluator};
