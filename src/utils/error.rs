//! Error Handling Module
//!
//! Defines the error type shared by the fundus classifier library.
//! Errors are split into recoverable ones (a misconfigured split, a missing
//! class directory) and fatal ones that must stop the current run.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for fundus classifier operations
#[derive(Error, Debug)]
pub enum FundusError {
    /// Malformed ratios, hyperparameters or config files
    #[error("Configuration error: {0}")]
    Config(String),

    /// A class source directory that should exist does not
    #[error("Class directory not found: {0}")]
    MissingClassDir(PathBuf),

    /// Error with dataset layout or contents
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// An image file could not be decoded
    #[error("Failed to decode image at '{path}': {reason}")]
    ImageDecode { path: PathBuf, reason: String },

    /// Error during a training or validation step
    #[error("Training error: {0}")]
    Training(String),

    /// A model artifact is unreadable or inconsistent
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Error during a forward pass at inference time
    #[error("Inference error: {0}")]
    Inference(String),

    /// Invalid caller-supplied input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Burn record (de)serialization failure
    #[error("Record error: {0}")]
    Record(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Image codec error outside of a specific file
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Whether a failure should stop the current run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Log it and carry on with a degraded result
    Recoverable,
    /// Propagate and halt the affected process
    Fatal,
}

impl FundusError {
    /// Classify this error
    pub fn severity(&self) -> Severity {
        match self {
            FundusError::Config(_) | FundusError::MissingClassDir(_) => Severity::Recoverable,
            _ => Severity::Fatal,
        }
    }

    /// Shorthand for `severity() == Severity::Recoverable`
    pub fn is_recoverable(&self) -> bool {
        self.severity() == Severity::Recoverable
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        FundusError::ImageDecode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience Result type for fundus classifier operations
pub type Result<T> = std::result::Result<T, FundusError>;

/// Extension trait for attaching context to foreign errors
pub trait ResultExt<T> {
    /// Wrap the error as a training failure with a message
    fn training_context(self, msg: &str) -> Result<T>;

    /// Wrap the error as an artifact failure with a lazily built message
    fn artifact_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    fn training_context(self, msg: &str) -> Result<T> {
        self.map_err(|e| FundusError::Training(format!("{}: {:?}", msg, e)))
    }

    fn artifact_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| FundusError::Artifact(format!("{}: {:?}", f(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FundusError::Dataset("empty split".to_string());
        assert_eq!(format!("{}", err), "Dataset error: empty split");
    }

    #[test]
    fn test_decode_error_mentions_path() {
        let err = FundusError::decode("/data/train/glaucoma/eye.jpg", "truncated");
        let msg = format!("{}", err);
        assert!(msg.contains("eye.jpg"));
        assert!(msg.contains("truncated"));
    }

    #[test]
    fn test_severity() {
        assert!(FundusError::Config("ratios".into()).is_recoverable());
        assert!(FundusError::MissingClassDir(PathBuf::from("x")).is_recoverable());
        assert_eq!(
            FundusError::Training("nan".into()).severity(),
            Severity::Fatal
        );
        assert_eq!(
            FundusError::Artifact("bad magic".into()).severity(),
            Severity::Fatal
        );
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, String> = Err("shape mismatch".to_string());
        let err = result.training_context("Failed to read logits").unwrap_err();
        assert!(matches!(err, FundusError::Training(_)));
        assert!(format!("{}", err).contains("Failed to read logits"));
    }
}
