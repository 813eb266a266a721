//! burn `Dataset` and `Batcher` over corpus samples.

use std::sync::atomic::{AtomicU64, Ordering};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use defect_core::{ClassLabel, Error, Result, Sample};
use image::DynamicImage;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};

use crate::{AugmentationPipeline, ImagePreprocessor};

/// One preprocessed sample
#[derive(Clone, Debug)]
pub struct DefectItem {
    /// CHW values, `3 * size * size` long
    pub image: Vec<f32>,
    pub label: ClassLabel,
    /// Source identifier (the image path)
    pub source: String,
}

/// Samples plus the transforms that turn them into [`DefectItem`]s.
///
/// With augmentation, each item is transformed with an RNG derived from
/// `(seed, epoch, index)`, so a run is reproducible while every epoch sees
/// different crops.
#[derive(Debug)]
pub struct DefectDataset {
    samples: Vec<Sample>,
    preprocessor: ImagePreprocessor,
    augmentation: Option<AugmentationPipeline>,
    seed: u64,
    epoch: AtomicU64,
    cache: Option<Vec<DefectItem>>,
}

impl DefectDataset {
    /// Deterministic dataset for evaluation and serving-side checks.
    pub fn new(samples: Vec<Sample>, preprocessor: ImagePreprocessor) -> Self {
        Self {
            samples,
            preprocessor,
            augmentation: None,
            seed: 0,
            epoch: AtomicU64::new(0),
            cache: None,
        }
    }

    /// Training dataset with randomized transforms.
    pub fn with_augmentation(
        samples: Vec<Sample>,
        preprocessor: ImagePreprocessor,
        augmentation: AugmentationPipeline,
        seed: u64,
    ) -> Self {
        Self {
            augmentation: Some(augmentation),
            seed,
            ..Self::new(samples, preprocessor)
        }
    }

    /// Decode every image up front. Only deterministic datasets are cached.
    pub fn cached(mut self) -> Result<Self> {
        if self.augmentation.is_some() {
            return Ok(self);
        }
        let items = (0..self.samples.len())
            .map(|i| self.load(i))
            .collect::<Result<Vec<_>>>()?;
        debug!("Cached {} items", items.len());
        self.cache = Some(items);
        Ok(self)
    }

    /// Select the augmentation stream for the next pass.
    pub fn set_epoch(&self, epoch: u64) {
        self.epoch.store(epoch, Ordering::Relaxed);
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn image_size(&self) -> usize {
        self.preprocessor.image_size()
    }

    /// Like [`Dataset::get`], but decode failures are reported.
    pub fn try_get(&self, index: usize) -> Result<DefectItem> {
        if let Some(cache) = &self.cache {
            return cache.get(index).cloned().ok_or_else(|| out_of_range(index, cache.len()));
        }
        self.load(index)
    }

    fn load(&self, index: usize) -> Result<DefectItem> {
        let sample = self
            .samples
            .get(index)
            .ok_or_else(|| out_of_range(index, self.samples.len()))?;
        let decoded = self.preprocessor.load(&sample.path)?;

        let image = match &self.augmentation {
            Some(pipeline) => {
                let mut rng = ChaCha8Rng::seed_from_u64(self.item_seed(index));
                let augmented = pipeline.augment(&decoded, &mut rng);
                self.preprocessor.preprocess(&DynamicImage::ImageRgb8(augmented))
            }
            None => self.preprocessor.preprocess(&decoded),
        };

        Ok(DefectItem {
            image,
            label: sample.label,
            source: sample.source(),
        })
    }

    fn item_seed(&self, index: usize) -> u64 {
        let epoch = self.epoch.load(Ordering::Relaxed);
        self.seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(epoch << 32)
            .wrapping_add(index as u64)
    }
}

fn out_of_range(index: usize, len: usize) -> Error {
    Error::InvalidArgument(format!("sample index {index} out of range for {len} samples"))
}

impl Dataset<DefectItem> for DefectDataset {
    fn get(&self, index: usize) -> Option<DefectItem> {
        match self.try_get(index) {
            Ok(item) => Some(item),
            Err(e) => {
                if index < self.samples.len() {
                    warn!("Skipping sample {}: {}", index, e);
                }
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch ready for the classifier
#[derive(Clone, Debug)]
pub struct DefectBatch<B: Backend> {
    /// `[N, 3, H, W]`
    pub images: Tensor<B, 4>,
    /// `[N]`
    pub targets: Tensor<B, 1, Int>,
    /// Source of each row, in row order
    pub sources: Vec<String>,
}

impl<B: Backend> DefectBatch<B> {
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Stacks [`DefectItem`]s into a [`DefectBatch`]
#[derive(Clone, Debug)]
pub struct DefectBatcher {
    image_size: usize,
}

impl DefectBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, DefectItem, DefectBatch<B>> for DefectBatcher {
    fn batch(&self, items: Vec<DefectItem>, device: &B::Device) -> DefectBatch<B> {
        let n = items.len();
        let size = self.image_size;

        let mut pixels = Vec::with_capacity(n * 3 * size * size);
        let mut labels = Vec::with_capacity(n);
        let mut sources = Vec::with_capacity(n);
        for item in items {
            debug_assert_eq!(item.image.len(), 3 * size * size);
            pixels.extend_from_slice(&item.image);
            labels.push(item.label as i64);
            sources.push(item.source);
        }

        let images = Tensor::<B, 4>::from_data(TensorData::new(pixels, [n, 3, size, size]), device);
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [n]), device);

        DefectBatch {
            images,
            targets,
            sources,
        }
    }
}
