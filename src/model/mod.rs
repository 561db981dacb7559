//! Model module for the fundus classifier using the Burn framework
//!
//! This module provides:
//! - A MobileNetV2 backbone used as a frozen feature extractor
//! - The trainable classification head producing logits
//!
//! The backbone can be initialized from a pretrained Burn record; without
//! one it starts from random weights.

pub mod backbone;
pub mod classifier;

pub use backbone::{BackboneConfig, MobileNetV2};
pub use classifier::{FundusClassifier, FundusClassifierConfig};
