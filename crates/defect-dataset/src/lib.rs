//! Dataset handling for building defect images.
//!
//! - [`corpus`]: class-per-directory corpus discovery
//! - [`preprocess`]: deterministic resize and normalization
//! - [`augmentation`]: randomized training transforms
//! - [`batch`]: burn `Dataset` and `Batcher` implementations

pub mod augmentation;
pub mod batch;
pub mod corpus;
pub mod preprocess;

pub use augmentation::AugmentationPipeline;
pub use batch::{DefectBatch, DefectBatcher, DefectDataset, DefectItem};
pub use corpus::{CorpusStats, ImageCorpus, IMAGE_EXTENSIONS};
pub use preprocess::{ImagePreprocessor, PreprocessConfig};

#[cfg(test)]
pub(crate) mod test_util {
    use image::{ImageBuffer, Rgb};
    use std::path::Path;

    /// Write a small solid-colour PNG.
    pub fn write_image(path: &Path, color: [u8; 3], size: u32) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_fn(size, size, |_, _| Rgb(color));
        img.save(path).unwrap();
    }
}
