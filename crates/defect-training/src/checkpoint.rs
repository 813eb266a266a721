//! Model artifacts on disk.
//!
//! A model directory holds:
//! - `best_model.mpk` / `last_model.mpk`: parameters (full-precision named MessagePack)
//! - `model_config.json`: classifier shape
//! - `preprocess.json`: input size and normalization
//! - `classes.json`: class mapping
//! - `best_model.json`: metadata of the best checkpoint
//! - `training_history.csv`: per-epoch metrics

use std::fs;
use std::path::{Path, PathBuf};

use burn::config::Config;
use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use defect_core::{ClassMapping, Error, Result, CLASS_MAPPING_FILE};
use defect_dataset::PreprocessConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{DefectClassifier, DefectClassifierConfig};

const MODEL_CONFIG_FILE: &str = "model_config.json";
const PREPROCESS_FILE: &str = "preprocess.json";
const BEST_CHECKPOINT_FILE: &str = "best_model.json";
const HISTORY_FILE: &str = "training_history.csv";
const RECORD_EXTENSION: &str = "mpk";

/// Weights are stored in f32 so a reloaded model scores exactly as validated.
type WeightsRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Metadata describing a saved checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 1-based epoch the parameters come from
    pub epoch: usize,
    /// Percent
    pub val_accuracy: f64,
    pub train_loss: f64,
    /// Percent
    pub train_accuracy: f64,
    pub learning_rate: f64,
    pub timestamp: String,
    pub metadata: CheckpointMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub model_architecture: String,
    pub backend: String,
    pub num_classes: usize,
    pub num_parameters: usize,
    pub image_size: usize,
    pub training_samples: usize,
    pub validation_samples: usize,
}

impl Checkpoint {
    pub fn new(
        epoch: usize,
        val_accuracy: f64,
        train_loss: f64,
        train_accuracy: f64,
        learning_rate: f64,
        metadata: CheckpointMetadata,
    ) -> Self {
        Self {
            epoch,
            val_accuracy,
            train_loss,
            train_accuracy,
            learning_rate,
            timestamp: chrono::Utc::now().to_rfc3339(),
            metadata,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize checkpoint: {e}")))?;
        fs::write(path, json)?;
        info!("Checkpoint saved to {:?}", path);
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| Error::Serialization(format!("Failed to deserialize checkpoint: {e}")))
    }
}

/// Which parameter snapshot to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weights {
    /// Highest validation accuracy seen
    Best,
    /// State after the final epoch
    Last,
}

impl Weights {
    fn stem(self) -> &'static str {
        match self {
            Weights::Best => "best_model",
            Weights::Last => "last_model",
        }
    }
}

/// Paths and I/O for one model directory
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    dir: PathBuf,
}

impl ModelArtifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn classes_path(&self) -> PathBuf {
        self.dir.join(CLASS_MAPPING_FILE)
    }

    pub fn model_config_path(&self) -> PathBuf {
        self.dir.join(MODEL_CONFIG_FILE)
    }

    pub fn preprocess_path(&self) -> PathBuf {
        self.dir.join(PREPROCESS_FILE)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(BEST_CHECKPOINT_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    /// Parameter file path, with extension.
    pub fn weights_path(&self, weights: Weights) -> PathBuf {
        self.dir.join(weights.stem()).with_extension(RECORD_EXTENSION)
    }

    /// Write everything needed to rebuild the model and feed it inputs.
    pub fn save_layout(
        &self,
        mapping: &ClassMapping,
        config: &DefectClassifierConfig,
        preprocess: &PreprocessConfig,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        mapping.save(&self.classes_path())?;
        config
            .save(self.model_config_path())
            .map_err(|e| Error::Model(format!("Failed to save model config: {e}")))?;
        fs::write(self.preprocess_path(), serde_json::to_string_pretty(preprocess)?)?;
        Ok(())
    }

    /// Preprocessing used at training time; defaults when absent.
    pub fn load_preprocess_config(&self) -> Result<PreprocessConfig> {
        let path = self.preprocess_path();
        if !path.exists() {
            return Ok(PreprocessConfig::default());
        }
        Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
    }

    pub fn load_mapping(&self) -> Result<ClassMapping> {
        ClassMapping::load(&self.classes_path())
    }

    pub fn load_model_config(&self) -> Result<DefectClassifierConfig> {
        let path = self.model_config_path();
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "model config not found at {}",
                path.display()
            )));
        }
        DefectClassifierConfig::load(&path)
            .map_err(|e| Error::Config(format!("Failed to load {}: {e}", path.display())))
    }

    pub fn save_model<B: Backend>(&self, model: &DefectClassifier<B>, weights: Weights) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.weights_path(weights);
        model
            .clone()
            .save_file(&path, &WeightsRecorder::new())
            .map_err(|e| Error::Model(format!("Failed to save {}: {e}", path.display())))?;
        info!("Model saved to {:?}", path);
        Ok(())
    }

    /// Rebuild the classifier and its class mapping from this directory.
    pub fn load_model<B: Backend>(
        &self,
        weights: Weights,
        device: &B::Device,
    ) -> Result<(DefectClassifier<B>, ClassMapping)> {
        let mapping = self.load_mapping()?;
        let config = self.load_model_config()?;
        if config.num_classes != mapping.num_classes() {
            return Err(Error::DimensionMismatch {
                expected: mapping.num_classes(),
                actual: config.num_classes,
            });
        }
        let model = load_record(config.init::<B>(device), &self.weights_path(weights), device)?;
        info!(
            "Loaded {:?} model from {:?} ({} classes)",
            weights,
            self.dir,
            mapping.num_classes()
        );
        Ok((model, mapping))
    }
}

/// Start from a saved record of the same backbone with its own head size,
/// then swap in a fresh head for `config.num_classes`.
pub fn load_pretrained<B: Backend>(
    path: &Path,
    pretrained_num_classes: usize,
    config: &DefectClassifierConfig,
    device: &B::Device,
) -> Result<DefectClassifier<B>> {
    let source_config = DefectClassifierConfig {
        num_classes: pretrained_num_classes,
        ..config.clone()
    };
    let model = load_record(source_config.init::<B>(device), path, device)?;
    info!(
        "Initialized backbone from {:?}, new head with {} classes",
        path, config.num_classes
    );
    Ok(model.with_head(config.num_classes, device))
}

fn load_record<B: Backend>(
    model: DefectClassifier<B>,
    path: &Path,
    device: &B::Device,
) -> Result<DefectClassifier<B>> {
    let file = path.with_extension(RECORD_EXTENSION);
    if !file.exists() {
        return Err(Error::NotFound(format!("weights not found at {}", file.display())));
    }
    model
        .load_file(&file, &WeightsRecorder::new(), device)
        .map_err(|e| Error::Model(format!("Failed to load {}: {e}", file.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn tiny(num_classes: usize) -> DefectClassifierConfig {
        DefectClassifierConfig::new(num_classes)
            .with_base_filters(2)
            .with_hidden_size(4)
    }

    fn mapping(n: usize) -> ClassMapping {
        ClassMapping::new((0..n).map(|i| format!("class_{i}")).collect()).unwrap()
    }

    fn metadata() -> CheckpointMetadata {
        CheckpointMetadata {
            model_architecture: "DefectClassifier".into(),
            backend: "ndarray".into(),
            num_classes: 3,
            num_parameters: 100,
            image_size: 224,
            training_samples: 10,
            validation_samples: 4,
        }
    }

    #[test]
    fn test_checkpoint_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ModelArtifacts::new(dir.path());
        let checkpoint = Checkpoint::new(3, 87.5, 0.42, 80.0, 1e-4, metadata());
        checkpoint.save(&artifacts.checkpoint_path()).unwrap();

        let loaded = Checkpoint::load(&artifacts.checkpoint_path()).unwrap();
        assert_eq!(loaded.epoch, 3);
        assert_eq!(loaded.metadata.num_classes, 3);
        assert!(!loaded.timestamp.is_empty());
    }

    #[test]
    fn test_model_roundtrip_preserves_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let artifacts = ModelArtifacts::new(dir.path().join("models"));
        let config = tiny(3);
        let model = config.init::<TestBackend>(&device);

        artifacts
            .save_layout(&mapping(3), &config, &PreprocessConfig::default())
            .unwrap();
        artifacts.save_model(&model, Weights::Best).unwrap();
        assert!(artifacts.weights_path(Weights::Best).exists());

        let (loaded, loaded_mapping) = artifacts
            .load_model::<TestBackend>(Weights::Best, &device)
            .unwrap();
        assert_eq!(loaded_mapping, mapping(3));
        assert_eq!(artifacts.load_preprocess_config().unwrap().image_size, 224);

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 16, 16], &device);
        let a: Vec<f32> = model.forward(input.clone()).into_data().to_vec().unwrap();
        let b: Vec<f32> = loaded.forward(input).into_data().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_weights_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let artifacts = ModelArtifacts::new(dir.path());
        artifacts
            .save_layout(&mapping(2), &tiny(2), &PreprocessConfig::default())
            .unwrap();

        let err = artifacts
            .load_model::<TestBackend>(Weights::Last, &device)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_mapping_and_config_disagree() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let artifacts = ModelArtifacts::new(dir.path());
        artifacts
            .save_layout(&mapping(2), &tiny(5), &PreprocessConfig::default())
            .unwrap();

        let err = artifacts
            .load_model::<TestBackend>(Weights::Best, &device)
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, actual: 5 }));
    }

    #[test]
    fn test_load_pretrained_swaps_head() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let artifacts = ModelArtifacts::new(dir.path());
        artifacts
            .save_model(&tiny(7).init::<TestBackend>(&device), Weights::Best)
            .unwrap();

        let model = load_pretrained::<TestBackend>(
            &artifacts.weights_path(Weights::Best),
            7,
            &tiny(3),
            &device,
        )
        .unwrap();
        assert_eq!(model.num_classes(), 3);
    }
}
