//! Supervised training loop.
//!
//! Each epoch shuffles the training set with a seeded RNG, runs
//! forward/backward/AdamW over mini-batches, then evaluates on the
//! validation set with the inference backend. The best epoch by validation
//! accuracy is checkpointed.

use burn::data::dataloader::batcher::Batcher;
use burn::module::{AutodiffModule, Module};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use defect_core::{ClassMapping, EpochMetrics, Error, Result, TrainConfig, TrainingHistory};
use defect_dataset::{
    AugmentationPipeline, DefectBatch, DefectBatcher, DefectDataset, ImageCorpus,
    ImagePreprocessor, PreprocessConfig,
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::backend::backend_name;
use crate::checkpoint::{load_pretrained, Checkpoint, CheckpointMetadata, ModelArtifacts, Weights};
use crate::evaluator::Evaluator;
use crate::model::{DefectClassifier, DefectClassifierConfig};

/// Hooks for progress reporting. Every method defaults to a no-op.
pub trait TrainingObserver {
    fn on_epoch_start(&mut self, _epoch: usize, _epochs: usize, _num_batches: usize) {}
    fn on_batch_end(&mut self, _batch: usize, _loss: f64, _running_accuracy: f64) {}
    fn on_validation_start(&mut self, _num_samples: usize) {}
    fn on_epoch_end(&mut self, _metrics: &EpochMetrics, _is_best: bool) {}
}

pub struct NoopObserver;

impl TrainingObserver for NoopObserver {}

/// Best-epoch and patience bookkeeping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingState {
    pub epoch: usize,
    pub best_epoch: Option<usize>,
    /// Percent
    pub best_val_accuracy: f64,
    pub patience_counter: usize,
    pub history: TrainingHistory,
}

impl TrainingState {
    /// Record a finished epoch; returns whether it is the new best.
    ///
    /// The first epoch is always best; later ones must strictly improve.
    pub fn update_epoch(&mut self, metrics: EpochMetrics) -> bool {
        self.epoch = metrics.epoch;
        let improved = self.best_epoch.is_none() || metrics.val_accuracy > self.best_val_accuracy;
        if improved {
            self.best_epoch = Some(metrics.epoch);
            self.best_val_accuracy = metrics.val_accuracy;
            self.patience_counter = 0;
        } else {
            self.patience_counter += 1;
            debug!(
                "No improvement for {} epoch(s), best {:.2}% at epoch {:?}",
                self.patience_counter, self.best_val_accuracy, self.best_epoch
            );
        }
        self.history.push(metrics);
        improved
    }

    pub fn should_stop(&self, patience: Option<usize>) -> bool {
        match patience {
            Some(p) if self.patience_counter >= p => {
                warn!("Early stopping: no improvement for {} epochs", p);
                true
            }
            _ => false,
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingOutcome {
    pub history: TrainingHistory,
    pub best_epoch: Option<usize>,
    pub best_val_accuracy: f64,
    pub stopped_early: bool,
    pub model_dir: PathBuf,
}

/// Datasets and model layout resolved from a [`TrainConfig`]
#[derive(Debug)]
pub struct PreparedRun {
    pub train: DefectDataset,
    pub val: DefectDataset,
    pub mapping: ClassMapping,
    pub model_config: DefectClassifierConfig,
    pub preprocess: PreprocessConfig,
}

pub struct Trainer<B: AutodiffBackend> {
    config: TrainConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: TrainConfig, device: B::Device) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, device })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Scan both corpora; validation is labelled with the training classes.
    pub fn prepare(&self) -> Result<PreparedRun> {
        let data = &self.config.data;
        let train_corpus = ImageCorpus::open(data.train_dir())?;
        if train_corpus.is_empty() {
            return Err(Error::EmptyInput(format!(
                "no training images under {}",
                train_corpus.root().display()
            )));
        }
        let mapping = train_corpus.mapping()?;

        // Validation is labelled through the training mapping; classes it
        // lacks are scored with zero support.
        let val_corpus = ImageCorpus::open_with_mapping(data.val_dir(), &mapping)?;
        if val_corpus.is_empty() {
            return Err(Error::EmptyInput(format!(
                "no validation images under {}",
                val_corpus.root().display()
            )));
        }
        train_corpus.stats().log();

        let preprocess = PreprocessConfig::from(data);
        let train = if self.config.augmentation.enabled {
            DefectDataset::with_augmentation(
                train_corpus.samples().to_vec(),
                ImagePreprocessor::new(preprocess.clone()),
                AugmentationPipeline::new(self.config.augmentation.clone(), data.image_size),
                self.config.training.seed,
            )
        } else {
            DefectDataset::new(
                train_corpus.samples().to_vec(),
                ImagePreprocessor::new(preprocess.clone()),
            )
        };
        let val = DefectDataset::new(
            val_corpus.samples().to_vec(),
            ImagePreprocessor::new(preprocess.clone()),
        );
        let model_config =
            DefectClassifierConfig::from_model_config(mapping.num_classes(), &self.config.model);

        Ok(PreparedRun {
            train,
            val,
            mapping,
            model_config,
            preprocess,
        })
    }

    /// Fresh model, or a pretrained backbone with a new head.
    pub fn build_model(&self, model_config: &DefectClassifierConfig) -> Result<DefectClassifier<B>> {
        let model = &self.config.model;
        match &model.pretrained_path {
            Some(path) => {
                let source_classes = model.pretrained_num_classes.ok_or_else(|| {
                    Error::Config("pretrained_path requires pretrained_num_classes".into())
                })?;
                load_pretrained::<B>(path, source_classes, model_config, &self.device)
            }
            None => Ok(model_config.init::<B>(&self.device)),
        }
    }

    pub fn run(&self, observer: &mut dyn TrainingObserver) -> Result<TrainingOutcome> {
        let prepared = self.prepare()?;
        let model = self.build_model(&prepared.model_config)?;
        self.fit(model, &prepared, observer)
    }

    pub fn fit(
        &self,
        mut model: DefectClassifier<B>,
        run: &PreparedRun,
        observer: &mut dyn TrainingObserver,
    ) -> Result<TrainingOutcome> {
        let params = &self.config.training;
        let artifacts = ModelArtifacts::new(&self.config.output.model_dir);
        artifacts.save_layout(&run.mapping, &run.model_config, &run.preprocess)?;

        let mut optimizer = AdamWConfig::new()
            .with_weight_decay(params.weight_decay)
            .init();
        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);
        let batcher = DefectBatcher::new(run.train.image_size());
        let evaluator = Evaluator::new(run.mapping.classes.clone(), params.batch_size);
        let mut epoch_rng = ChaCha8Rng::seed_from_u64(params.seed);
        let mut state = TrainingState::default();
        let mut stopped_early = false;

        let train_len = run.train.samples().len();
        let num_batches = train_len.div_ceil(params.batch_size);

        info!(
            "Training {} params on {} ({} train / {} val, {} classes, {} epochs)",
            model.num_params(),
            backend_name(),
            train_len,
            run.val.samples().len(),
            run.mapping.num_classes(),
            params.epochs
        );

        for epoch in 1..=params.epochs {
            run.train.set_epoch(epoch as u64 - 1);
            let mut indices: Vec<usize> = (0..train_len).collect();
            indices.shuffle(&mut epoch_rng);
            observer.on_epoch_start(epoch, params.epochs, num_batches);

            let mut train_loss = 0.0f64;
            let mut correct = 0usize;
            let mut seen = 0usize;

            for (batch_idx, chunk) in indices.chunks(params.batch_size).enumerate() {
                let items = chunk
                    .iter()
                    .map(|&i| run.train.try_get(i))
                    .collect::<Result<Vec<_>>>()?;
                let batch: DefectBatch<B> = batcher.batch(items, &self.device);
                let n = batch.len();

                let output = model.forward(batch.images);
                let loss = loss_fn.forward(output.clone(), batch.targets.clone());
                let loss_value: f64 = loss.clone().into_scalar().elem();

                let batch_correct: i64 = output
                    .argmax(1)
                    .reshape([n])
                    .equal(batch.targets)
                    .int()
                    .sum()
                    .into_scalar()
                    .elem();

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(params.learning_rate, model, grads);

                train_loss += loss_value;
                correct += batch_correct as usize;
                seen += n;
                observer.on_batch_end(batch_idx + 1, loss_value, percent(correct, seen));
            }

            let train_accuracy = percent(correct, seen);

            observer.on_validation_start(run.val.samples().len());
            let valid_model = model.valid();
            let report = evaluator.evaluate_dataset::<B::InnerBackend, _>(
                &run.val,
                &self.device,
                |x| valid_model.forward(x),
            )?;

            let metrics = EpochMetrics {
                epoch,
                train_loss,
                train_accuracy,
                val_accuracy: report.accuracy,
            };
            let is_best = state.update_epoch(metrics.clone());
            info!(
                "Epoch {}/{}: loss {:.4} | train acc {:.2}% | val acc {:.2}%{}",
                epoch,
                params.epochs,
                train_loss,
                train_accuracy,
                report.accuracy,
                if is_best { " (best)" } else { "" }
            );

            if is_best {
                artifacts.save_model(&valid_model, Weights::Best)?;
                let metadata = CheckpointMetadata {
                    model_architecture: "DefectClassifier".into(),
                    backend: backend_name().into(),
                    num_classes: run.mapping.num_classes(),
                    num_parameters: valid_model.num_params(),
                    image_size: run.preprocess.image_size,
                    training_samples: train_len,
                    validation_samples: report.num_samples,
                };
                Checkpoint::new(
                    epoch,
                    report.accuracy,
                    train_loss,
                    train_accuracy,
                    params.learning_rate,
                    metadata,
                )
                .save(&artifacts.checkpoint_path())?;
            }
            state.history.save_csv(&artifacts.history_path())?;
            observer.on_epoch_end(&metrics, is_best);

            if state.should_stop(params.early_stopping_patience) {
                stopped_early = true;
                break;
            }
        }

        artifacts.save_model(&model.valid(), Weights::Last)?;
        if let Some(best) = state.history.best() {
            info!(
                "Training finished: best val acc {:.2}% at epoch {} (train loss {:.4})",
                best.val_accuracy, best.epoch, best.train_loss
            );
        }

        Ok(TrainingOutcome {
            history: state.history,
            best_epoch: state.best_epoch,
            best_val_accuracy: state.best_val_accuracy,
            stopped_early,
            model_dir: artifacts.dir().to_path_buf(),
        })
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::write_image;
    use crate::Predictor;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use std::path::Path;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn metrics(epoch: usize, val_accuracy: f64) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train_loss: 1.0,
            train_accuracy: 50.0,
            val_accuracy,
        }
    }

    fn tiny_config(data: &Path, out: &Path) -> TrainConfig {
        let mut config = TrainConfig::default();
        config.data.data_dir = data.to_path_buf();
        config.data.image_size = 16;
        config.model.base_filters = 2;
        config.model.hidden_size = 4;
        config.training.epochs = 2;
        config.training.batch_size = 2;
        config.output.model_dir = out.to_path_buf();
        config
    }

    fn build_corpus(root: &Path) {
        for (split, n) in [("train", 3), ("val", 1)] {
            for i in 0..n {
                write_image(&root.join(format!("{split}/Crack/{i}.png")), [250, 10, 10], 20);
                write_image(&root.join(format!("{split}/Mold/{i}.png")), [10, 120, 10], 20);
            }
        }
    }

    #[test]
    fn test_first_epoch_is_best_then_strict_improvement() {
        let mut state = TrainingState::default();
        assert!(state.update_epoch(metrics(1, 0.0)));
        assert!(!state.update_epoch(metrics(2, 0.0)));
        assert!(state.update_epoch(metrics(3, 10.0)));
        assert!(!state.update_epoch(metrics(4, 10.0)));
        assert_eq!(state.best_epoch, Some(3));
        assert_eq!(state.history.epochs.len(), 4);
        assert_eq!(state.history.best().map(|m| m.epoch), state.best_epoch);
    }

    #[test]
    fn test_should_stop_after_patience() {
        let mut state = TrainingState::default();
        state.update_epoch(metrics(1, 50.0));
        state.update_epoch(metrics(2, 40.0));
        assert!(!state.should_stop(Some(2)));
        state.update_epoch(metrics(3, 45.0));
        assert!(state.should_stop(Some(2)));
        assert!(!state.should_stop(None));
    }

    #[test]
    fn test_training_run_writes_artifacts() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        build_corpus(data.path());

        let trainer =
            Trainer::<TestBackend>::new(tiny_config(data.path(), out.path()), Default::default())
                .unwrap();
        let outcome = trainer.run(&mut NoopObserver).unwrap();

        assert_eq!(outcome.history.epochs.len(), 2);
        assert!(outcome.best_epoch.is_some());
        assert!(!outcome.stopped_early);

        let artifacts = ModelArtifacts::new(out.path());
        assert!(artifacts.classes_path().exists());
        assert!(artifacts.weights_path(Weights::Best).exists());
        assert!(artifacts.weights_path(Weights::Last).exists());
        assert!(artifacts.checkpoint_path().exists());
        assert!(artifacts.history_path().exists());

        let mapping = artifacts.load_mapping().unwrap();
        assert_eq!(mapping.classes, vec!["Crack".to_string(), "Mold".to_string()]);

        let predictor =
            Predictor::<NdArray<f32>>::from_artifacts(&artifacts, Weights::Best, Default::default())
                .unwrap();
        let bytes = std::fs::read(data.path().join("val/Crack/0.png")).unwrap();
        let result = predictor.predict_bytes(&bytes).unwrap();
        assert_eq!(result.probabilities.len(), 2);
    }

    #[derive(Default)]
    struct LossRecorder {
        batch_losses: Vec<f64>,
        epoch_losses: Vec<(f64, f64)>,
    }

    impl TrainingObserver for LossRecorder {
        fn on_epoch_start(&mut self, _epoch: usize, _epochs: usize, _num_batches: usize) {
            self.batch_losses.clear();
        }

        fn on_batch_end(&mut self, _batch: usize, loss: f64, _running_accuracy: f64) {
            self.batch_losses.push(loss);
        }

        fn on_epoch_end(&mut self, metrics: &EpochMetrics, _is_best: bool) {
            let summed = self.batch_losses.iter().sum::<f64>();
            self.epoch_losses.push((summed, metrics.train_loss));
        }
    }

    #[test]
    fn test_epoch_loss_is_sum_of_batch_losses() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        build_corpus(data.path());

        let trainer =
            Trainer::<TestBackend>::new(tiny_config(data.path(), out.path()), Default::default())
                .unwrap();
        let mut recorder = LossRecorder::default();
        trainer.run(&mut recorder).unwrap();

        assert_eq!(recorder.epoch_losses.len(), 2);
        for (summed, reported) in recorder.epoch_losses {
            assert!((summed - reported).abs() < 1e-9);
        }
    }

    #[test]
    fn test_class_mismatch_between_splits() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        build_corpus(data.path());
        write_image(&data.path().join("val/Stain/0.png"), [1, 2, 3], 20);

        let trainer =
            Trainer::<TestBackend>::new(tiny_config(data.path(), out.path()), Default::default())
                .unwrap();
        assert!(matches!(trainer.prepare(), Err(Error::Config(_))));
    }

    #[test]
    fn test_val_may_lack_a_training_class() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        build_corpus(data.path());
        write_image(&data.path().join("train/Stain/0.png"), [90, 90, 20], 20);

        let trainer =
            Trainer::<TestBackend>::new(tiny_config(data.path(), out.path()), Default::default())
                .unwrap();
        let prepared = trainer.prepare().unwrap();
        assert_eq!(prepared.mapping.num_classes(), 3);
        assert_eq!(prepared.model_config.num_classes, 3);
        assert!(prepared.val.samples().iter().all(|s| s.label < 2));
    }

    #[test]
    fn test_empty_training_corpus() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(data.path().join("train/Crack")).unwrap();
        write_image(&data.path().join("val/Crack/0.png"), [1, 2, 3], 20);

        let trainer =
            Trainer::<TestBackend>::new(tiny_config(data.path(), out.path()), Default::default())
                .unwrap();
        assert!(matches!(trainer.prepare(), Err(Error::EmptyInput(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = TrainConfig::default();
        config.training.epochs = 0;
        assert!(Trainer::<TestBackend>::new(config, Default::default()).is_err());
    }

    #[test]
    fn test_pretrained_requires_class_count() {
        let mut config = TrainConfig::default();
        config.model.pretrained_path = Some(PathBuf::from("weights.mpk"));
        let trainer = Trainer::<TestBackend>::new(config, Default::default()).unwrap();
        let model_config = DefectClassifierConfig::new(3);
        assert!(matches!(trainer.build_model(&model_config), Err(Error::Config(_))));
    }
}
