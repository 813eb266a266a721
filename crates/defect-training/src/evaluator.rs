//! Evaluation pass over an ordered validation set.
//!
//! Batches are consumed strictly in order. Each row's arg-max is counted in
//! the confusion matrix, and misclassified rows are recorded with that row's
//! own source identifier.

use burn::data::dataloader::batcher::Batcher;
use burn::tensor::{backend::Backend, Tensor};
use defect_core::{EvaluationAccumulator, EvaluationReport, Error, Result};
use defect_dataset::{DefectBatch, DefectBatcher, DefectDataset};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Evaluator {
    class_names: Vec<String>,
    batch_size: usize,
}

impl Evaluator {
    pub fn new(class_names: Vec<String>, batch_size: usize) -> Self {
        Self {
            class_names,
            batch_size: batch_size.max(1),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Evaluate pre-built batches.
    ///
    /// `forward` maps `[N, 3, H, W]` to logits `[N, K]`. A width other than
    /// the class count aborts the pass with [`Error::DimensionMismatch`]; an
    /// empty input yields [`Error::EmptyInput`].
    pub fn evaluate_batches<B, I, F>(&self, batches: I, mut forward: F) -> Result<EvaluationReport>
    where
        B: Backend,
        I: IntoIterator<Item = DefectBatch<B>>,
        F: FnMut(Tensor<B, 4>) -> Tensor<B, 2>,
    {
        let mut acc = EvaluationAccumulator::new(self.class_names.clone());
        for batch in batches {
            self.observe_batch(&mut acc, batch, &mut forward)?;
        }
        self.finish(acc)
    }

    /// Evaluate a dataset in index order. Undecodable images abort the pass.
    pub fn evaluate_dataset<B, F>(
        &self,
        dataset: &DefectDataset,
        device: &B::Device,
        mut forward: F,
    ) -> Result<EvaluationReport>
    where
        B: Backend,
        F: FnMut(Tensor<B, 4>) -> Tensor<B, 2>,
    {
        let batcher = DefectBatcher::new(dataset.image_size());
        let mut acc = EvaluationAccumulator::new(self.class_names.clone());
        let total = dataset.samples().len();

        for start in (0..total).step_by(self.batch_size) {
            let end = (start + self.batch_size).min(total);
            let items = (start..end)
                .map(|i| dataset.try_get(i))
                .collect::<Result<Vec<_>>>()?;
            let batch: DefectBatch<B> = batcher.batch(items, device);
            self.observe_batch(&mut acc, batch, &mut forward)?;
        }
        self.finish(acc)
    }

    fn observe_batch<B, F>(
        &self,
        acc: &mut EvaluationAccumulator,
        batch: DefectBatch<B>,
        forward: &mut F,
    ) -> Result<()>
    where
        B: Backend,
        F: FnMut(Tensor<B, 4>) -> Tensor<B, 2>,
    {
        if batch.is_empty() {
            return Ok(());
        }
        let logits = forward(batch.images);
        let [rows, width] = logits.dims();
        if width != self.num_classes() {
            return Err(Error::DimensionMismatch {
                expected: self.num_classes(),
                actual: width,
            });
        }
        if rows != batch.sources.len() {
            return Err(Error::Model(format!(
                "classifier returned {rows} rows for a batch of {}",
                batch.sources.len()
            )));
        }

        let predictions = to_labels(logits.argmax(1).into_data())?;
        let targets = to_labels(batch.targets.into_data())?;
        for ((source, actual), predicted) in batch.sources.into_iter().zip(targets).zip(predictions) {
            acc.observe(source, actual, predicted)?;
        }
        debug!("Evaluated {} samples", acc.seen());
        Ok(())
    }

    fn finish(&self, acc: EvaluationAccumulator) -> Result<EvaluationReport> {
        let report = acc.finish()?;
        info!(
            "Evaluation: {}/{} correct ({:.2}%), {} misclassified",
            report.correct,
            report.num_samples,
            report.accuracy,
            report.misclassified.len()
        );
        Ok(report)
    }
}

fn to_labels(data: burn::tensor::TensorData) -> Result<Vec<usize>> {
    let values = data
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| Error::Model(format!("unreadable label tensor: {e:?}")))?;
    values
        .into_iter()
        .map(|v| {
            usize::try_from(v).map_err(|_| Error::InvalidArgument(format!("negative label {v}")))
        })
        .collect()
}
