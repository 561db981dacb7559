//! Data Augmentation Module for Fundus Images
//!
//! Random, label-preserving geometric perturbations applied to training
//! images after the resize and before normalization:
//!
//! - rotation within ±`rotation_degrees`
//! - horizontal and vertical shifts as a fraction of the image size
//! - independent x/y zoom in `[1 - zoom_range, 1 + zoom_range]`
//! - horizontal flip with probability 0.5
//!
//! Rotation, shift and zoom are folded into a single inverse affine map and
//! sampled bilinearly once. Samples that land outside the source repeat the
//! nearest edge pixel, so no black borders are introduced.
//!
//! Validation, test and inference images never pass through here.

use image::{Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Maximum rotation angle in degrees (applies ±rotation_degrees)
    pub rotation_degrees: f32,
    /// Maximum horizontal shift as a fraction of the width
    pub width_shift: f32,
    /// Maximum vertical shift as a fraction of the height
    pub height_shift: f32,
    /// Zoom factors are drawn from `[1 - zoom_range, 1 + zoom_range]`
    pub zoom_range: f32,
    /// Flip left-right half of the time
    pub horizontal_flip: bool,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_degrees: 20.0,
            width_shift: 0.2,
            height_shift: 0.2,
            zoom_range: 0.2,
            horizontal_flip: true,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            rotation_degrees: 0.0,
            width_shift: 0.0,
            height_shift: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.rotation_degrees == 0.0
            && self.width_shift == 0.0
            && self.height_shift == 0.0
            && self.zoom_range == 0.0
            && !self.horizontal_flip
    }
}

/// One draw of the random transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    pub angle_degrees: f32,
    /// Shift in pixels
    pub tx: f32,
    pub ty: f32,
    pub zoom_x: f32,
    pub zoom_y: f32,
    pub flip: bool,
}

impl TransformParams {
    pub fn identity() -> Self {
        Self {
            angle_degrees: 0.0,
            tx: 0.0,
            ty: 0.0,
            zoom_x: 1.0,
            zoom_y: 1.0,
            flip: false,
        }
    }
}

/// Image augmenter that applies random transformations
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn no_augmentation() -> Self {
        Self::new(AugmentationConfig::none())
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Draw transform parameters for an image of the given size
    pub fn sample_params(&self, width: u32, height: u32, rng: &mut ChaCha8Rng) -> TransformParams {
        let c = &self.config;
        let symmetric = |rng: &mut ChaCha8Rng, limit: f32| {
            if limit > 0.0 {
                rng.gen_range(-limit..=limit)
            } else {
                0.0
            }
        };

        let angle_degrees = symmetric(rng, c.rotation_degrees);
        let tx = symmetric(rng, c.width_shift) * width as f32;
        let ty = symmetric(rng, c.height_shift) * height as f32;
        let (zoom_x, zoom_y) = if c.zoom_range > 0.0 {
            let lo = 1.0 - c.zoom_range;
            let hi = 1.0 + c.zoom_range;
            (rng.gen_range(lo..=hi), rng.gen_range(lo..=hi))
        } else {
            (1.0, 1.0)
        };
        let flip = c.horizontal_flip && rng.gen_bool(0.5);

        TransformParams {
            angle_degrees,
            tx,
            ty,
            zoom_x,
            zoom_y,
            flip,
        }
    }

    /// Apply a random transform, keeping the image size
    pub fn augment(&self, img: &RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        if self.config.is_identity() {
            return img.clone();
        }
        let (width, height) = img.dimensions();
        let params = self.sample_params(width, height, rng);
        apply_transform(img, &params)
    }
}

/// Warp `img` with the given parameters
///
/// For each output pixel `p` the source location is
/// `c + R(θ) · (Z · (p - c) + t)` around the image centre `c`.
pub fn apply_transform(img: &RgbImage, params: &TransformParams) -> RgbImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return img.clone();
    }

    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let (sin_a, cos_a) = params.angle_degrees.to_radians().sin_cos();

    let mut output = RgbImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let dx = (x as f32 - cx) * params.zoom_x + params.tx;
            let dy = (y as f32 - cy) * params.zoom_y + params.ty;

            let src_x = cx + dx * cos_a - dy * sin_a;
            let src_y = cy + dx * sin_a + dy * cos_a;

            let out_x = if params.flip { width - 1 - x } else { x };
            output.put_pixel(out_x, y, bilinear_sample(img, src_x, src_y));
        }
    }
    output
}

/// Bilinear sample with edge clamping
fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut result = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        result[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn create_test_image() -> RgbImage {
        RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 128]))
    }

    #[test]
    fn test_identity_transform_is_lossless() {
        let img = create_test_image();
        let out = apply_transform(&img, &TransformParams::identity());
        assert_eq!(out, img);
    }

    #[test]
    fn test_flip_only() {
        let img = create_test_image();
        let params = TransformParams {
            flip: true,
            ..TransformParams::identity()
        };
        let out = apply_transform(&img, &params);
        assert_eq!(out.get_pixel(0, 5), img.get_pixel(63, 5));
        assert_eq!(out.get_pixel(63, 10), img.get_pixel(0, 10));
    }

    #[test]
    fn test_shift_repeats_edge_instead_of_black() {
        let img = RgbImage::from_pixel(16, 16, Rgb([200, 100, 50]));
        let params = TransformParams {
            tx: 8.0,
            ty: -5.0,
            ..TransformParams::identity()
        };
        let out = apply_transform(&img, &params);
        assert!(out.pixels().all(|p| *p == Rgb([200, 100, 50])));
    }

    #[test]
    fn test_params_within_bounds() {
        let aug = Augmenter::new(AugmentationConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut flips = 0;

        for _ in 0..500 {
            let p = aug.sample_params(100, 50, &mut rng);
            assert!(p.angle_degrees.abs() <= 20.0);
            assert!(p.tx.abs() <= 20.0 + 1e-4);
            assert!(p.ty.abs() <= 10.0 + 1e-4);
            assert!((0.8..=1.2).contains(&p.zoom_x));
            assert!((0.8..=1.2).contains(&p.zoom_y));
            flips += p.flip as usize;
        }
        assert!(flips > 150 && flips < 350);
    }

    #[test]
    fn test_augment_keeps_size_and_is_seeded() {
        let aug = Augmenter::new(AugmentationConfig::default());
        let img = create_test_image();

        let a = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(7));
        let b = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(a.dimensions(), (64, 64));
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_augmentation_returns_input() {
        let aug = Augmenter::no_augmentation();
        let img = create_test_image();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(aug.augment(&img, &mut rng), img);
    }
}
