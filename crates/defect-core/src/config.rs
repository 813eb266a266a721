//! Configuration structures for training and evaluation.
//!
//! Every section deserializes with `#[serde(default)]`, so a TOML file only
//! needs to name the values it changes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

/// Main configuration for a training run
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TrainConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub training: TrainingParams,
    pub augmentation: AugmentationConfig,
    pub output: OutputConfig,
}

impl TrainConfig {
    /// Reject settings that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.training.epochs == 0 {
            return Err(Error::Config("epochs must be greater than 0".into()));
        }
        if self.training.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than 0".into()));
        }
        if !(self.training.learning_rate > 0.0) {
            return Err(Error::Config(format!(
                "learning_rate must be positive, got {}",
                self.training.learning_rate
            )));
        }
        if self.data.image_size < 16 {
            return Err(Error::Config(format!(
                "image_size must be at least 16, got {}",
                self.data.image_size
            )));
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return Err(Error::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.model.dropout
            )));
        }
        self.augmentation.validate()
    }
}

/// Where the corpus lives and how images are shaped
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root containing `train/` and `val/`
    pub data_dir: PathBuf,
    /// Square side length fed to the model
    pub image_size: usize,
    /// Per-channel normalization mean
    pub mean: [f32; 3],
    /// Per-channel normalization std
    pub std: [f32; 3],
}

impl DataConfig {
    pub fn train_dir(&self) -> PathBuf {
        self.data_dir.join(crate::DataSplit::Train.dir_name())
    }

    pub fn val_dir(&self) -> PathBuf {
        self.data_dir.join(crate::DataSplit::Val.dir_name())
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            image_size: 224,
            // Plain [0, 1] scaling unless a run opts into channel statistics
            mean: [0.0; 3],
            std: [1.0; 3],
        }
    }
}

/// Classifier shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Filters in the first convolution block; doubles per block
    pub base_filters: usize,
    /// Hidden width of the classification head
    pub hidden_size: usize,
    /// Dropout before the output layer
    pub dropout: f64,
    /// Saved record of the same backbone to start from
    pub pretrained_path: Option<PathBuf>,
    /// Class count of the pretrained record's head
    pub pretrained_num_classes: Option<usize>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_filters: 16,
            hidden_size: 256,
            dropout: 0.2,
            pretrained_path: None,
            pretrained_num_classes: None,
        }
    }
}

/// Optimization hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// AdamW decoupled weight decay
    pub weight_decay: f32,
    /// Stop after this many epochs without a validation improvement
    pub early_stopping_patience: Option<usize>,
    pub seed: u64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 8,
            batch_size: 4,
            learning_rate: 1e-4,
            weight_decay: 1e-2,
            early_stopping_patience: None,
            seed: 42,
        }
    }
}

/// Randomized training-time transforms
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    pub enabled: bool,
    /// Lower and upper bound of the crop area fraction
    pub crop_scale: (f32, f32),
    pub horizontal_flip: bool,
    /// Maximum absolute rotation in degrees
    pub rotation_degrees: f32,
    /// Jitter factors sampled from `[1 - x, 1 + x]`
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
}

impl AugmentationConfig {
    pub fn validate(&self) -> Result<()> {
        let (lo, hi) = self.crop_scale;
        if !(lo > 0.0 && lo <= hi && hi <= 1.0) {
            return Err(Error::Config(format!(
                "crop_scale must satisfy 0 < min <= max <= 1, got ({lo}, {hi})"
            )));
        }
        for (name, value) in [
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("saturation", self.saturation),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{name} jitter must be in [0, 1), got {value}"
                )));
            }
        }
        if self.rotation_degrees < 0.0 {
            return Err(Error::Config("rotation_degrees must be non-negative".into()));
        }
        Ok(())
    }
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            crop_scale: (0.8, 1.0),
            horizontal_flip: true,
            rotation_degrees: 10.0,
            brightness: 0.2,
            contrast: 0.2,
            saturation: 0.2,
        }
    }
}

/// Artifact locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving weights, class mapping and history
    pub model_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("output/models"),
        }
    }
}
