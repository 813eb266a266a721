//! Evaluation metrics: confusion matrix, per-class accuracy and
//! misclassification capture.
//!
//! Everything here is plain data. The burn-facing evaluator turns logits into
//! arg-max labels and feeds them to an [`EvaluationAccumulator`] in iteration
//! order.

use serde::{Deserialize, Serialize};

use crate::{ClassLabel, Error, Result};

/// Default number of misclassified records shown in reports.
pub const DEFAULT_MISCLASSIFIED_LIMIT: usize = 10;

/// Confusion matrix for multi-class classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    /// Row = true class, column = predicted class, row-major
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    /// Zero-filled `num_classes × num_classes` matrix.
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Count one sample. Out-of-range labels are rejected rather than dropped.
    pub fn record(&mut self, actual: ClassLabel, predicted: ClassLabel) -> Result<()> {
        for (what, label) in [("true", actual), ("predicted", predicted)] {
            if label >= self.num_classes {
                return Err(Error::InvalidArgument(format!(
                    "{what} label {label} out of range for {} classes",
                    self.num_classes
                )));
            }
        }
        self.matrix[actual * self.num_classes + predicted] += 1;
        Ok(())
    }

    /// Count at (actual, predicted); 0 outside the matrix.
    pub fn get(&self, actual: ClassLabel, predicted: ClassLabel) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn row(&self, actual: ClassLabel) -> &[usize] {
        let start = actual * self.num_classes;
        &self.matrix[start..start + self.num_classes]
    }

    pub fn rows(&self) -> Vec<Vec<usize>> {
        (0..self.num_classes).map(|r| self.row(r).to_vec()).collect()
    }

    /// Number of samples counted.
    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Diagonal sum.
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    /// Ground-truth count per class.
    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes).map(|r| self.row(r).iter().sum()).collect()
    }

    /// Overall accuracy in percent; 0 when empty.
    pub fn accuracy(&self) -> f64 {
        percent(self.correct(), self.total())
    }

    /// `100 * M[c][c] / row_sum(c)`, exactly 0 for classes with no samples.
    pub fn per_class_accuracy(&self) -> Vec<f64> {
        self.row_sums()
            .iter()
            .enumerate()
            .map(|(c, &support)| percent(self.get(c, c), support))
            .collect()
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

/// A sample whose prediction differed from its label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MisclassifiedRecord {
    /// Position of the sample in iteration order, starting at 0
    pub sample_index: usize,
    /// Source identifier of that same sample
    pub source: String,
    pub true_class: String,
    pub predicted_class: String,
}

/// Accuracy of a single class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassAccuracy {
    pub class_id: ClassLabel,
    pub class_name: String,
    /// Ground-truth samples of this class
    pub support: usize,
    pub correct: usize,
    /// Percent, 0 when `support == 0`
    pub accuracy: f64,
}

/// Tabular view of a confusion matrix with class names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrixReport {
    /// Column and row headers, in class-index order
    pub class_names: Vec<String>,
    /// `rows[true][predicted]`
    pub rows: Vec<Vec<usize>>,
    pub per_class_accuracy: Vec<ClassAccuracy>,
}

/// Pair a matrix with its class names.
pub fn confusion_matrix_report(
    matrix: &ConfusionMatrix,
    class_names: &[String],
) -> Result<ConfusionMatrixReport> {
    if class_names.len() != matrix.num_classes {
        return Err(Error::InvalidArgument(format!(
            "{} class names for a {}x{} matrix",
            class_names.len(),
            matrix.num_classes,
            matrix.num_classes
        )));
    }

    let row_sums = matrix.row_sums();
    let per_class_accuracy = matrix
        .per_class_accuracy()
        .into_iter()
        .enumerate()
        .map(|(c, accuracy)| ClassAccuracy {
            class_id: c,
            class_name: class_names[c].clone(),
            support: row_sums[c],
            correct: matrix.get(c, c),
            accuracy,
        })
        .collect();

    Ok(ConfusionMatrixReport {
        class_names: class_names.to_vec(),
        rows: matrix.rows(),
        per_class_accuracy,
    })
}

/// Result of one evaluation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub num_samples: usize,
    pub correct: usize,
    /// Overall accuracy in percent
    pub accuracy: f64,
    pub confusion_matrix: ConfusionMatrix,
    pub class_names: Vec<String>,
    pub per_class_accuracy: Vec<ClassAccuracy>,
    /// Every misclassified sample, in iteration order
    pub misclassified: Vec<MisclassifiedRecord>,
}

impl EvaluationReport {
    pub fn matrix_report(&self) -> ConfusionMatrixReport {
        ConfusionMatrixReport {
            class_names: self.class_names.clone(),
            rows: self.confusion_matrix.rows(),
            per_class_accuracy: self.per_class_accuracy.clone(),
        }
    }

    /// The first `limit` misclassified records.
    pub fn misclassified_head(&self, limit: usize) -> &[MisclassifiedRecord] {
        &self.misclassified[..self.misclassified.len().min(limit)]
    }
}

/// Accumulates one evaluation pass, sample by sample.
#[derive(Debug, Clone)]
pub struct EvaluationAccumulator {
    class_names: Vec<String>,
    matrix: ConfusionMatrix,
    misclassified: Vec<MisclassifiedRecord>,
    seen: usize,
}

impl EvaluationAccumulator {
    pub fn new(class_names: Vec<String>) -> Self {
        let matrix = ConfusionMatrix::new(class_names.len());
        Self {
            class_names,
            matrix,
            misclassified: Vec::new(),
            seen: 0,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Samples observed so far.
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Record the next sample in iteration order.
    pub fn observe(
        &mut self,
        source: impl Into<String>,
        actual: ClassLabel,
        predicted: ClassLabel,
    ) -> Result<()> {
        self.matrix.record(actual, predicted)?;
        if actual != predicted {
            self.misclassified.push(MisclassifiedRecord {
                sample_index: self.seen,
                source: source.into(),
                true_class: self.class_names[actual].clone(),
                predicted_class: self.class_names[predicted].clone(),
            });
        }
        self.seen += 1;
        Ok(())
    }

    /// Close the pass. An empty pass is an error, not 0% accuracy.
    pub fn finish(self) -> Result<EvaluationReport> {
        if self.seen == 0 {
            return Err(Error::EmptyInput(
                "evaluation set contains no samples".into(),
            ));
        }
        let report = confusion_matrix_report(&self.matrix, &self.class_names)?;
        Ok(EvaluationReport {
            num_samples: self.seen,
            correct: self.matrix.correct(),
            accuracy: self.matrix.accuracy(),
            confusion_matrix: self.matrix,
            class_names: self.class_names,
            per_class_accuracy: report.per_class_accuracy,
            misclassified: self.misclassified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> Vec<String> {
        vec!["A".into(), "B".into(), "C".into()]
    }

    fn run(truths: &[usize], preds: &[usize]) -> EvaluationReport {
        let mut acc = EvaluationAccumulator::new(abc());
        for (i, (&t, &p)) in truths.iter().zip(preds).enumerate() {
            acc.observe(format!("sample#{}", i + 1), t, p).unwrap();
        }
        acc.finish().unwrap()
    }

    #[test]
    fn test_three_class_scenario() {
        let report = run(&[0, 0, 1, 1, 2, 2], &[0, 1, 1, 1, 2, 0]);

        assert_eq!(
            report.confusion_matrix.rows(),
            vec![vec![1, 1, 0], vec![0, 2, 0], vec![1, 0, 1]]
        );
        let accs: Vec<f64> = report.per_class_accuracy.iter().map(|c| c.accuracy).collect();
        assert_eq!(accs, vec![50.0, 100.0, 50.0]);

        assert_eq!(report.misclassified.len(), 2);
        assert_eq!(report.misclassified[0].source, "sample#2");
        assert_eq!(report.misclassified[0].sample_index, 1);
        assert_eq!(report.misclassified[0].true_class, "A");
        assert_eq!(report.misclassified[0].predicted_class, "B");
        assert_eq!(report.misclassified[1].source, "sample#6");
        assert_eq!(report.misclassified[1].true_class, "C");
        assert_eq!(report.misclassified[1].predicted_class, "A");
    }

    #[test]
    fn test_zero_support_class_reports_zero() {
        let report = run(&[0, 0, 1], &[0, 1, 1]);
        let c = &report.per_class_accuracy[2];
        assert_eq!(c.support, 0);
        assert_eq!(c.accuracy, 0.0);
        assert!(!c.accuracy.is_nan());
    }

    #[test]
    fn test_empty_pass_is_error() {
        let acc = EvaluationAccumulator::new(abc());
        assert!(matches!(acc.finish(), Err(Error::EmptyInput(_))));
    }

    #[test]
    fn test_all_wrong_is_zero_not_error() {
        let report = run(&[0, 1], &[1, 0]);
        assert_eq!(report.accuracy, 0.0);
        assert_eq!(report.misclassified.len(), 2);
    }

    #[test]
    fn test_sum_invariants() {
        let truths = [0, 2, 1, 1, 0, 2, 2, 1, 0, 0];
        let preds = [0, 1, 1, 2, 0, 2, 0, 1, 2, 0];
        let report = run(&truths, &preds);
        let cm = &report.confusion_matrix;

        assert_eq!(cm.total(), truths.len());
        assert_eq!(report.misclassified.len(), cm.total() - cm.correct());
        for (c, class) in report.per_class_accuracy.iter().enumerate() {
            assert!(cm.get(c, c) <= cm.row_sums()[c]);
            assert_eq!(class.support, truths.iter().filter(|&&t| t == c).count());
        }
    }

    #[test]
    fn test_out_of_range_label_rejected() {
        let mut acc = EvaluationAccumulator::new(abc());
        assert!(matches!(acc.observe("x", 3, 0), Err(Error::InvalidArgument(_))));
        assert!(matches!(acc.observe("x", 0, 7), Err(Error::InvalidArgument(_))));
        assert_eq!(acc.seen(), 0);
    }

    #[test]
    fn test_report_requires_matching_names() {
        let cm = ConfusionMatrix::new(3);
        assert!(confusion_matrix_report(&cm, &["A".to_string()]).is_err());
        let report = confusion_matrix_report(&cm, &abc()).unwrap();
        assert_eq!(report.rows.len(), 3);
        assert!(report.per_class_accuracy.iter().all(|c| c.accuracy == 0.0));
    }

    #[test]
    fn test_misclassified_head() {
        let truths: Vec<usize> = vec![0; 15];
        let preds: Vec<usize> = vec![1; 15];
        let report = run(&truths, &preds);
        assert_eq!(report.misclassified_head(DEFAULT_MISCLASSIFIED_LIMIT).len(), 10);
        assert_eq!(report.misclassified_head(100).len(), 15);
        assert_eq!(report.misclassified_head(10)[9].sample_index, 9);
    }
}
