//! MobileNetV2 feature extractor
//!
//! Inverted-residual backbone producing `[batch, 1280, H/32, W/32]` feature
//! maps. Channel counts follow the width multiplier and are rounded to
//! multiples of 8.

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::Backend, Tensor},
};
use tracing::info;

use crate::utils::error::{FundusError, Result as FundusResult};

/// `(expansion t, channels c, repeats n, first stride s)` per stage
const INVERTED_RESIDUAL_SETTINGS: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

const STEM_CHANNELS: usize = 32;
const LAST_CHANNELS: usize = 1280;

/// Configuration for the MobileNetV2 backbone
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// Width multiplier (alpha)
    #[config(default = "1.0")]
    pub width_multiplier: f64,
}

impl BackboneConfig {
    /// Channels of the final feature map
    pub fn out_channels(&self) -> usize {
        make_divisible(LAST_CHANNELS as f64 * self.width_multiplier.max(1.0))
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> MobileNetV2<B> {
        let alpha = self.width_multiplier;
        let mut in_channels = make_divisible(STEM_CHANNELS as f64 * alpha);
        let stem = ConvBnRelu6::new(3, in_channels, 3, 2, 1, device);

        let mut blocks = Vec::new();
        for (t, c, n, s) in INVERTED_RESIDUAL_SETTINGS {
            let out_channels = make_divisible(c as f64 * alpha);
            for i in 0..n {
                let stride = if i == 0 { s } else { 1 };
                blocks.push(InvertedResidual::new(in_channels, out_channels, stride, t, device));
                in_channels = out_channels;
            }
        }

        let head = ConvBnRelu6::new(in_channels, self.out_channels(), 1, 1, 1, device);

        MobileNetV2 { stem, blocks, head }
    }
}

/// Round to the nearest multiple of 8, never dropping more than 10%
fn make_divisible(value: f64) -> usize {
    const DIVISOR: usize = 8;
    let rounded = ((value + DIVISOR as f64 / 2.0) as usize / DIVISOR * DIVISOR).max(DIVISOR);
    if (rounded as f64) < 0.9 * value {
        rounded + DIVISOR
    } else {
        rounded
    }
}

/// Convolution, batch norm and ReLU6
///
/// Stride-2 convolutions zero-pad explicitly before a valid convolution,
/// one row/column short at the top and left when the side is even. This is
/// the layout of Keras's `correct_pad`, so converted ImageNet weights see
/// the same receptive fields.
#[derive(Module, Debug)]
pub struct ConvBnRelu6<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    /// Zero padding applied in `forward`; 0 when the conv pads itself
    half_kernel: usize,
}

impl<B: Backend> ConvBnRelu6<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        device: &B::Device,
    ) -> Self {
        let half = kernel_size / 2;
        let (padding, half_kernel) = if stride > 1 {
            (PaddingConfig2d::Valid, half)
        } else {
            (PaddingConfig2d::Explicit(half, half), 0)
        };
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(padding)
            .with_groups(groups)
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);
        Self {
            conv,
            bn,
            half_kernel,
        }
    }

    /// `(left, right, top, bottom)` zero padding for a `[h, w]` input
    fn correct_pad(&self, height: usize, width: usize) -> (usize, usize, usize, usize) {
        let k = self.half_kernel;
        let leading = |side: usize| k.saturating_sub(1 - side % 2);
        (leading(width), k, leading(height), k)
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = if self.half_kernel > 0 {
            let [_, _, height, width] = x.dims();
            x.pad(self.correct_pad(height, width), 0.0)
        } else {
            x
        };
        let x = self.bn.forward(self.conv.forward(x));
        x.clamp(0.0, 6.0)
    }
}

/// Expand (1x1), depthwise (3x3), linear projection (1x1)
///
/// The skip connection is used whenever the block preserves the shape,
/// which is exactly stride 1 with equal input and output channels.
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvBnRelu6<B>>,
    depthwise: ConvBnRelu6<B>,
    project: Conv2d<B>,
    project_bn: BatchNorm<B, 2>,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expand_ratio: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expand_ratio;
        let expand = (expand_ratio != 1)
            .then(|| ConvBnRelu6::new(in_channels, hidden, 1, 1, 1, device));
        let depthwise = ConvBnRelu6::new(hidden, hidden, 3, stride, hidden, device);
        let project = Conv2dConfig::new([hidden, out_channels], [1, 1])
            .with_bias(false)
            .init(device);
        let project_bn = BatchNormConfig::new(out_channels).init(device);

        Self {
            expand,
            depthwise,
            project,
            project_bn,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = match &self.expand {
            Some(expand) => expand.forward(x.clone()),
            None => x.clone(),
        };
        let out = self.depthwise.forward(out);
        let out = self.project_bn.forward(self.project.forward(out));

        if out.dims() == x.dims() {
            out + x
        } else {
            out
        }
    }
}

/// MobileNetV2 without its classification top
#[derive(Module, Debug)]
pub struct MobileNetV2<B: Backend> {
    stem: ConvBnRelu6<B>,
    blocks: Vec<InvertedResidual<B>>,
    head: ConvBnRelu6<B>,
}

impl<B: Backend> MobileNetV2<B> {
    /// `[batch, 3, H, W]` to `[batch, C, H/32, W/32]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.stem.forward(images);
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.head.forward(x)
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Replace the weights with a pretrained Burn record
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> FundusResult<Self> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let backbone = self
            .load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| {
                FundusError::Record(format!(
                    "Failed to load pretrained backbone from {:?}: {}",
                    path, e
                ))
            })?;
        info!("Loaded pretrained backbone weights from {:?}", path);
        Ok(backbone)
    }
}
