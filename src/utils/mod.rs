//! Utilities module for logging, metrics, and helper functions
//!
//! This module provides:
//! - Structured logging with tracing
//! - Metrics computation (accuracy, F1-score, confusion matrix)
//! - SVG report charts
//! - Tensor value extraction
//! - Error handling types

pub mod charts;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod tensor;

pub use error::{FundusError, Result, Severity};
pub use logging::init_logging;
pub use metrics::{argmax, softmax, ConfusionMatrix, Metrics};

/// `42.0s`, `3m 5s` or `2h 14m`
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        return format!("{:.1}s", seconds);
    }
    let whole = seconds.round() as u64;
    match whole {
        0..=3599 => format!("{}m {}s", whole / 60, whole % 60),
        _ => format!("{}h {}m", whole / 3600, (whole % 3600) / 60),
    }
}

/// Thousands separated with commas
pub fn format_number(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
