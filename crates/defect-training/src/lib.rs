//! Model, training, evaluation and inference for building defect images.

pub mod backend;
pub mod checkpoint;
pub mod evaluator;
pub mod model;
pub mod predictor;
pub mod trainer;

pub use backend::{default_device, DefaultBackend, TrainingBackend};
pub use checkpoint::{load_pretrained, Checkpoint, CheckpointMetadata, ModelArtifacts, Weights};
pub use evaluator::Evaluator;
pub use model::{DefectClassifier, DefectClassifierConfig};
pub use predictor::{PredictionResult, Predictor};
pub use trainer::{
    NoopObserver, PreparedRun, Trainer, TrainingObserver, TrainingOutcome, TrainingState,
};

#[cfg(test)]
pub(crate) mod test_util {
    use image::{ImageBuffer, Rgb};
    use std::path::Path;

    pub fn write_image(path: &Path, color: [u8; 3], size: u32) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_fn(size, size, |_, _| Rgb(color));
        img.save(path).unwrap();
    }
}
