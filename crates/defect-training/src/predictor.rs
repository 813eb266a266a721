//! Single-image inference.

use std::time::Instant;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use defect_core::{ClassLabel, ClassMapping, Error, Prediction, Result};
use defect_dataset::ImagePreprocessor;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkpoint::{ModelArtifacts, Weights};
use crate::model::DefectClassifier;

/// Outcome of classifying one image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_class: ClassLabel,
    pub class_name: String,
    /// Softmax probability of `predicted_class`
    pub confidence: f32,
    /// Full distribution, in class-index order
    pub probabilities: Vec<f32>,
    pub inference_time_ms: f64,
}

impl PredictionResult {
    /// Build from a probability vector; ties go to the lowest index.
    pub fn from_probabilities(
        probabilities: Vec<f32>,
        mapping: &ClassMapping,
        inference_time_ms: f64,
    ) -> Result<Self> {
        let (predicted_class, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((i, p)),
            })
            .ok_or_else(|| Error::Model("classifier returned no probabilities".into()))?;
        let class_name = mapping
            .name(predicted_class)
            .ok_or_else(|| Error::DimensionMismatch {
                expected: mapping.num_classes(),
                actual: probabilities.len(),
            })?
            .to_string();
        Ok(Self {
            predicted_class,
            class_name,
            confidence,
            probabilities,
            inference_time_ms,
        })
    }

    pub fn prediction(&self) -> Prediction {
        Prediction {
            label: self.predicted_class,
            confidence: self.confidence,
        }
    }
}

/// A loaded model with its class mapping and input pipeline
#[derive(Debug)]
pub struct Predictor<B: Backend> {
    model: DefectClassifier<B>,
    mapping: ClassMapping,
    preprocessor: ImagePreprocessor,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    pub fn new(
        model: DefectClassifier<B>,
        mapping: ClassMapping,
        preprocessor: ImagePreprocessor,
        device: B::Device,
    ) -> Result<Self> {
        if model.num_classes() != mapping.num_classes() {
            return Err(Error::DimensionMismatch {
                expected: mapping.num_classes(),
                actual: model.num_classes(),
            });
        }
        Ok(Self {
            model,
            mapping,
            preprocessor,
            device,
        })
    }

    /// Load weights, class mapping and preprocessing from a model directory.
    pub fn from_artifacts(artifacts: &ModelArtifacts, weights: Weights, device: B::Device) -> Result<Self> {
        let (model, mapping) = artifacts.load_model::<B>(weights, &device)?;
        let preprocessor = ImagePreprocessor::new(artifacts.load_preprocess_config()?);
        Self::new(model, mapping, preprocessor, device)
    }

    pub fn mapping(&self) -> &ClassMapping {
        &self.mapping
    }

    pub fn predict_image(&self, image: &DynamicImage) -> Result<PredictionResult> {
        let start = Instant::now();
        let [channels, height, width] = self.preprocessor.output_shape();
        let pixels = self.preprocessor.preprocess(image);
        let input = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [1, channels, height, width]),
            &self.device,
        );

        let probs = self.model.forward_softmax(input);
        let [_, width] = probs.dims();
        if width != self.mapping.num_classes() {
            return Err(Error::DimensionMismatch {
                expected: self.mapping.num_classes(),
                actual: width,
            });
        }
        let probabilities = probs
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| Error::Model(format!("unreadable output tensor: {e:?}")))?;

        let elapsed = start.elapsed().as_secs_f64() * 1000.0;
        let result = PredictionResult::from_probabilities(probabilities, &self.mapping, elapsed)?;
        debug!(
            "Predicted {} ({:.3}) in {:.1}ms",
            result.class_name, result.confidence, elapsed
        );
        Ok(result)
    }

    /// Decode an encoded image and classify it.
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<PredictionResult> {
        let image = self.preprocessor.decode_bytes(bytes)?;
        self.predict_image(&image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DefectClassifierConfig;
    use burn_ndarray::NdArray;
    use defect_dataset::PreprocessConfig;
    use image::{ImageBuffer, Rgb};

    type TestBackend = NdArray<f32>;

    fn mapping() -> ClassMapping {
        ClassMapping::new(vec!["Paint".into(), "Plumbing".into(), "Wall_Crack".into()]).unwrap()
    }

    fn predictor() -> Predictor<TestBackend> {
        let device = Default::default();
        let model = DefectClassifierConfig::new(3)
            .with_base_filters(2)
            .with_hidden_size(4)
            .init::<TestBackend>(&device);
        let pre = ImagePreprocessor::new(PreprocessConfig {
            image_size: 16,
            ..Default::default()
        });
        Predictor::new(model, mapping(), pre, device).unwrap()
    }

    #[test]
    fn test_from_probabilities_picks_max() {
        let result = PredictionResult::from_probabilities(vec![0.1, 0.7, 0.2], &mapping(), 1.0).unwrap();
        assert_eq!(result.predicted_class, 1);
        assert_eq!(result.class_name, "Plumbing");
        assert!((result.confidence - 0.7).abs() < 1e-6);
        assert_eq!(result.prediction().label, 1);
    }

    #[test]
    fn test_ties_resolve_to_lowest_index() {
        let result = PredictionResult::from_probabilities(vec![0.2, 0.4, 0.4], &mapping(), 0.0).unwrap();
        assert_eq!(result.predicted_class, 1);
    }

    #[test]
    fn test_predict_image() {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(40, 30, Rgb([90, 90, 90])));
        let result = predictor().predict_image(&img).unwrap();
        assert_eq!(result.probabilities.len(), 3);
        assert!((0.0..=1.0).contains(&result.confidence));
        let sum: f32 = result.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_predict_bad_bytes() {
        assert!(matches!(predictor().predict_bytes(b"\x00\x01"), Err(Error::Image(_))));
    }

    #[test]
    fn test_class_count_mismatch() {
        let device = Default::default();
        let model = DefectClassifierConfig::new(5)
            .with_base_filters(2)
            .with_hidden_size(4)
            .init::<TestBackend>(&device);
        let err = Predictor::new(model, mapping(), ImagePreprocessor::default(), device).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 5 }));
    }
}
