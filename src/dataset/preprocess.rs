//! Deterministic image preprocessing
//!
//! A [`PreprocessRecipe`] is stored inside every model artifact so that
//! training, evaluation and serving all turn pixels into tensors the same way:
//! RGB8 conversion, exact resize, normalization, then channels-first layout.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, RgbImage};
use serde::{Deserialize, Serialize};

use crate::utils::error::{FundusError, Result};

/// ImageNet normalization mean values (RGB)
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resampling filter used for the exact resize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    #[default]
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Pixel normalization expected by the backbone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `x / 127.5 - 1`, mapping into [-1, 1]
    #[default]
    MobilenetV2,
    /// `(x / 255 - mean) / std` per channel
    Imagenet,
}

impl Normalization {
    #[inline]
    pub fn apply(&self, value: u8, channel: usize) -> f32 {
        match self {
            Normalization::MobilenetV2 => value as f32 / 127.5 - 1.0,
            Normalization::Imagenet => {
                (value as f32 / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]
            }
        }
    }
}

/// Preprocessing recipe persisted with a trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessRecipe {
    pub image_height: u32,
    pub image_width: u32,
    pub resize_filter: ResizeFilter,
    pub normalization: Normalization,
}

impl Default for PreprocessRecipe {
    fn default() -> Self {
        Self {
            image_height: 256,
            image_width: 256,
            resize_filter: ResizeFilter::default(),
            normalization: Normalization::default(),
        }
    }
}

impl PreprocessRecipe {
    pub fn square(size: u32) -> Self {
        Self {
            image_height: size,
            image_width: size,
            ..Self::default()
        }
    }

    /// `[channels, height, width]` of one preprocessed image
    pub fn input_shape(&self) -> [usize; 3] {
        [3, self.image_height as usize, self.image_width as usize]
    }

    /// Number of floats per preprocessed image
    pub fn input_len(&self) -> usize {
        self.input_shape().iter().product()
    }

    /// Convert to RGB8 and resize exactly to the target size
    pub fn resize(&self, img: &DynamicImage) -> RgbImage {
        let rgb = img.to_rgb8();
        if rgb.dimensions() == (self.image_width, self.image_height) {
            return rgb;
        }
        image::imageops::resize(
            &rgb,
            self.image_width,
            self.image_height,
            self.resize_filter.into(),
        )
    }

    /// Normalize an already resized image into a CHW float vector
    pub fn normalize(&self, rgb: &RgbImage) -> Vec<f32> {
        let (width, height) = rgb.dimensions();
        let plane = (width * height) as usize;
        let mut data = vec![0.0f32; 3 * plane];

        for (i, pixel) in rgb.pixels().enumerate() {
            for c in 0..3 {
                data[c * plane + i] = self.normalization.apply(pixel[c], c);
            }
        }
        data
    }

    /// Full deterministic pipeline: resize then normalize
    pub fn apply(&self, img: &DynamicImage) -> Vec<f32> {
        self.normalize(&self.resize(img))
    }
}

/// Decode an image file from disk
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .map_err(|e| FundusError::decode(path, e))?
        .with_guessed_format()
        .map_err(|e| FundusError::decode(path, e))?
        .decode()
        .map_err(|e| FundusError::decode(path, e))
}

/// Decode an in-memory upload
pub fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(FundusError::InvalidInput("Empty image payload".to_string()));
    }
    Ok(image::load_from_memory(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 4) as u8, (y * 4) as u8, 128])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_mobilenet_range() {
        let n = Normalization::MobilenetV2;
        assert_eq!(n.apply(0, 0), -1.0);
        assert_eq!(n.apply(255, 2), 1.0);
        assert!((n.apply(128, 1) - 0.003_921_6).abs() < 1e-5);
    }

    #[test]
    fn test_resize_and_layout() {
        let recipe = PreprocessRecipe {
            image_height: 16,
            image_width: 24,
            ..PreprocessRecipe::default()
        };
        let data = recipe.apply(&gradient(64, 40));
        assert_eq!(data.len(), recipe.input_len());
        assert_eq!(recipe.input_shape(), [3, 16, 24]);

        // blue channel is constant 128 and lives in the last plane
        let plane = 16 * 24;
        let expected = 128.0 / 127.5 - 1.0;
        assert!(data[2 * plane..].iter().all(|v| (v - expected).abs() < 1e-6));
    }

    #[test]
    fn test_apply_is_deterministic() {
        let recipe = PreprocessRecipe::square(32);
        let img = gradient(50, 50);
        assert_eq!(recipe.apply(&img), recipe.apply(&img));
    }

    #[test]
    fn test_grayscale_becomes_three_channels() {
        let gray = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(8, 8, image::Luma([255])));
        let data = PreprocessRecipe::square(8).apply(&gray);
        assert_eq!(data.len(), 3 * 64);
        assert!(data.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_decode_bytes_rejects_garbage() {
        assert!(matches!(decode_bytes(&[]), Err(FundusError::InvalidInput(_))));
        assert!(decode_bytes(b"definitely not an image").is_err());
    }

    #[test]
    fn test_recipe_serde_names() {
        let json = serde_json::to_string(&PreprocessRecipe::default()).unwrap();
        assert!(json.contains("\"triangle\""));
        assert!(json.contains("\"mobilenet_v2\""));
    }
}
