//! Transfer-learning classifier for fundus images
//!
//! A frozen MobileNetV2 backbone feeds a small trainable head:
//! global average pooling, dropout, dense + ReLU, dropout, dense logits.
//! No softmax is part of the graph; callers apply it when they need
//! probabilities.

use std::path::PathBuf;

use burn::{
    config::Config,
    module::{AutodiffModule, Module},
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{
        activation::softmax,
        backend::{AutodiffBackend, Backend},
        Tensor,
    },
};
use tracing::warn;

use crate::model::backbone::{BackboneConfig, MobileNetV2};
use crate::utils::error::Result as FundusResult;

/// Configuration for the FundusClassifier model
#[derive(Config, Debug)]
pub struct FundusClassifierConfig {
    /// Number of output classes
    #[config(default = "4")]
    pub num_classes: usize,

    /// MobileNetV2 width multiplier
    #[config(default = "1.0")]
    pub width_multiplier: f64,

    /// Units of the hidden dense layer
    #[config(default = "128")]
    pub hidden_units: usize,

    /// Dropout rate before each dense layer
    #[config(default = "0.2")]
    pub dropout_rate: f64,

    /// Optional Burn record with pretrained backbone weights
    pub pretrained_weights: Option<PathBuf>,
}

impl FundusClassifierConfig {
    pub fn backbone(&self) -> BackboneConfig {
        BackboneConfig::new().with_width_multiplier(self.width_multiplier)
    }

    /// Build the model, loading pretrained backbone weights when configured
    pub fn init<B: Backend>(&self, device: &B::Device) -> FundusResult<FundusClassifier<B>> {
        let mut backbone = self.backbone().init(device);
        match &self.pretrained_weights {
            Some(path) => backbone = backbone.load_pretrained(path, device)?,
            None => warn!("No pretrained backbone weights configured, using random initialization"),
        }
        Ok(self.with_backbone(backbone, device))
    }

    /// Build the model around an existing backbone
    pub fn with_backbone<B: Backend>(
        &self,
        backbone: MobileNetV2<B>,
        device: &B::Device,
    ) -> FundusClassifier<B> {
        let features = self.backbone().out_channels();

        FundusClassifier {
            backbone,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout1: DropoutConfig::new(self.dropout_rate).init(),
            fc1: LinearConfig::new(features, self.hidden_units).init(device),
            dropout2: DropoutConfig::new(self.dropout_rate).init(),
            fc2: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
            num_classes: self.num_classes,
        }
    }
}

/// Frozen backbone plus trainable head
#[derive(Module, Debug)]
pub struct FundusClassifier<B: Backend> {
    pub backbone: MobileNetV2<B>,
    pool: AdaptiveAvgPool2d,
    dropout1: Dropout,
    pub fc1: Linear<B>,
    dropout2: Dropout,
    pub fc2: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> FundusClassifier<B> {
    /// Forward pass through the whole network
    ///
    /// # Arguments
    /// * `images` - Input tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(images);
        self.head(features)
    }

    /// Classification head on backbone feature maps
    pub fn head(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(features);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.dropout1.forward(x);
        let x = Relu::new().forward(self.fc1.forward(x));
        let x = self.dropout2.forward(x);
        self.fc2.forward(x)
    }

    /// Forward pass with softmax for inference
    pub fn forward_softmax(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Parameters updated by training
    pub fn head_param_count(&self) -> usize {
        self.fc1.num_params() + self.fc2.num_params()
    }

    /// Parameters of the frozen backbone
    pub fn backbone_param_count(&self) -> usize {
        self.backbone.num_params()
    }
}

impl<B: AutodiffBackend> FundusClassifier<B> {
    /// Training forward pass with the backbone frozen
    ///
    /// The backbone runs on the inner backend, so it is excluded from the
    /// autodiff graph and its batch norms use their running statistics.
    pub fn forward_frozen(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.valid().forward(images.inner());
        self.head(Tensor::from_inner(features))
    }
}
