//! Deterministic image preprocessing.
//!
//! RGB conversion, exact resize to a square, scaling to `[0, 1]` and
//! per-channel normalization, laid out CHW for burn.

use std::path::Path;

use defect_core::{DataConfig, Error, ImageDimensions, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, RgbImage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Square side length of the output
    pub image_size: usize,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            image_size: 224,
            mean: [0.0; 3],
            std: [1.0; 3],
        }
    }
}

impl From<&DataConfig> for PreprocessConfig {
    fn from(data: &DataConfig) -> Self {
        Self {
            image_size: data.image_size,
            mean: data.mean,
            std: data.std,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    config: PreprocessConfig,
}

impl ImagePreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn image_size(&self) -> usize {
        self.config.image_size
    }

    /// `[channels, height, width]` of every output.
    pub fn output_shape(&self) -> [usize; 3] {
        let dims = ImageDimensions::square_rgb(self.config.image_size);
        [dims.channels, dims.height, dims.width]
    }

    /// Decode an image file.
    pub fn load(&self, path: &Path) -> Result<DynamicImage> {
        ImageReader::open(path)
            .map_err(|e| Error::Image(format!("{}: {e}", path.display())))?
            .with_guessed_format()
            .map_err(|e| Error::Image(format!("{}: {e}", path.display())))?
            .decode()
            .map_err(|e| Error::Image(format!("{}: {e}", path.display())))
    }

    /// Decode an in-memory encoded image (PNG, JPEG, ...).
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory(bytes).map_err(|e| Error::Image(format!("undecodable image: {e}")))
    }

    /// Resize and normalize into a CHW vector.
    pub fn preprocess(&self, image: &DynamicImage) -> Vec<f32> {
        let size = self.config.image_size as u32;
        let rgb = if image.width() == size && image.height() == size {
            image.to_rgb8()
        } else {
            image.resize_exact(size, size, FilterType::Triangle).to_rgb8()
        };
        self.normalize(&rgb)
    }

    pub fn preprocess_path(&self, path: &Path) -> Result<Vec<f32>> {
        Ok(self.preprocess(&self.load(path)?))
    }

    fn normalize(&self, image: &RgbImage) -> Vec<f32> {
        let (width, height) = image.dimensions();
        let plane = (width * height) as usize;
        let mut out = vec![0.0f32; plane * 3];
        for (i, pixel) in image.pixels().enumerate() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                out[c * plane + i] = (value - self.config.mean[c]) / self.config.std[c];
            }
        }
        out
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(PreprocessConfig::default())
    }
}
