//! Randomized training-time transforms.
//!
//! Random resized crop, horizontal flip, small-angle rotation and colour
//! jitter. The caller owns the RNG, so a seeded RNG gives a reproducible
//! result.

use defect_core::AugmentationConfig;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use rand::seq::SliceRandom;
use rand::Rng;

/// Aspect ratio bounds for the random crop.
const CROP_RATIO: (f32, f32) = (3.0 / 4.0, 4.0 / 3.0);
const CROP_ATTEMPTS: usize = 10;

#[derive(Debug, Clone)]
pub struct AugmentationPipeline {
    config: AugmentationConfig,
    output_size: u32,
}

impl AugmentationPipeline {
    pub fn new(config: AugmentationConfig, output_size: usize) -> Self {
        Self {
            config,
            output_size: output_size as u32,
        }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Apply every enabled transform. The result is `output_size` square.
    pub fn augment<R: Rng + ?Sized>(&self, image: &DynamicImage, rng: &mut R) -> RgbImage {
        let mut img = self.random_resized_crop(image, rng);

        if self.config.horizontal_flip && rng.gen_bool(0.5) {
            img = imageops::flip_horizontal(&img);
        }

        if self.config.rotation_degrees > 0.0 {
            let max = self.config.rotation_degrees;
            let angle = rng.gen_range(-max..=max);
            img = rotate(&img, angle);
        }

        self.color_jitter(img, rng)
    }

    /// Crop a random region covering `crop_scale` of the area at a random
    /// aspect ratio, then resize it to the output size. Falls back to a
    /// centre crop when no attempt fits.
    fn random_resized_crop<R: Rng + ?Sized>(&self, image: &DynamicImage, rng: &mut R) -> RgbImage {
        let (width, height) = image.dimensions();
        let area = (width * height) as f32;
        let (min_scale, max_scale) = self.config.crop_scale;

        for _ in 0..CROP_ATTEMPTS {
            let target_area = area * rng.gen_range(min_scale..=max_scale);
            let log_ratio = rng.gen_range(CROP_RATIO.0.ln()..=CROP_RATIO.1.ln());
            let ratio = log_ratio.exp();

            let w = (target_area * ratio).sqrt().round() as u32;
            let h = (target_area / ratio).sqrt().round() as u32;
            if w > 0 && h > 0 && w <= width && h <= height {
                let x = rng.gen_range(0..=width - w);
                let y = rng.gen_range(0..=height - h);
                return image
                    .crop_imm(x, y, w, h)
                    .resize_exact(self.output_size, self.output_size, FilterType::Triangle)
                    .to_rgb8();
            }
        }

        let side = width.min(height);
        image
            .crop_imm((width - side) / 2, (height - side) / 2, side, side)
            .resize_exact(self.output_size, self.output_size, FilterType::Triangle)
            .to_rgb8()
    }

    /// Brightness, contrast and saturation in random order.
    fn color_jitter<R: Rng + ?Sized>(&self, mut img: RgbImage, rng: &mut R) -> RgbImage {
        let mut order = [0u8, 1, 2];
        order.shuffle(rng);
        for op in order {
            img = match op {
                0 if self.config.brightness > 0.0 => {
                    adjust_brightness(&img, jitter_factor(self.config.brightness, rng))
                }
                1 if self.config.contrast > 0.0 => {
                    adjust_contrast(&img, jitter_factor(self.config.contrast, rng))
                }
                2 if self.config.saturation > 0.0 => {
                    adjust_saturation(&img, jitter_factor(self.config.saturation, rng))
                }
                _ => img,
            };
        }
        img
    }
}

fn jitter_factor<R: Rng + ?Sized>(amount: f32, rng: &mut R) -> f32 {
    rng.gen_range((1.0 - amount)..=(1.0 + amount))
}

fn rotate(img: &RgbImage, degrees: f32) -> RgbImage {
    if degrees.abs() < 1e-3 {
        return img.clone();
    }
    rotate_about_center(
        img,
        degrees.to_radians(),
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
    )
}

fn luminance(p: &Rgb<u8>) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

fn blend(value: u8, toward: f32, factor: f32) -> u8 {
    (toward + factor * (value as f32 - toward)).clamp(0.0, 255.0).round() as u8
}

pub(crate) fn adjust_brightness(img: &RgbImage, factor: f32) -> RgbImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        for c in 0..3 {
            p[c] = blend(p[c], 0.0, factor);
        }
    }
    out
}

pub(crate) fn adjust_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    let count = (img.width() * img.height()).max(1) as f32;
    let mean = img.pixels().map(luminance).sum::<f32>() / count;
    let mut out = img.clone();
    for p in out.pixels_mut() {
        for c in 0..3 {
            p[c] = blend(p[c], mean, factor);
        }
    }
    out
}

pub(crate) fn adjust_saturation(img: &RgbImage, factor: f32) -> RgbImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        let gray = luminance(p);
        for c in 0..3 {
            p[c] = blend(p[c], gray, factor);
        }
    }
    out
}
