//! Per-epoch training metrics.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::Result;

/// Metrics of one finished epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch: usize,
    /// Sum of the epoch's batch losses
    pub train_loss: f64,
    /// Percent
    pub train_accuracy: f64,
    /// Percent
    pub val_accuracy: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    /// Epoch with the highest validation accuracy; earliest wins ties.
    pub fn best(&self) -> Option<&EpochMetrics> {
        self.epochs.iter().fold(None, |best, m| match best {
            Some(b) if b.val_accuracy >= m.val_accuracy => Some(b),
            _ => Some(m),
        })
    }

    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let mut content = String::from("epoch,train_loss,train_accuracy,val_accuracy\n");
        for m in &self.epochs {
            let _ = writeln!(
                content,
                "{},{:.6},{:.4},{:.4}",
                m.epoch, m.train_loss, m.train_accuracy, m.val_accuracy
            );
        }
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(epoch: usize, val_accuracy: f64) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train_loss: 1.0 / epoch as f64,
            train_accuracy: 50.0,
            val_accuracy,
        }
    }

    #[test]
    fn test_best_prefers_earliest_on_tie() {
        let mut history = TrainingHistory::default();
        assert!(history.best().is_none());
        history.push(epoch(1, 40.0));
        history.push(epoch(2, 75.0));
        history.push(epoch(3, 75.0));
        assert_eq!(history.best().unwrap().epoch, 2);
    }

    #[test]
    fn test_save_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training_history.csv");
        let mut history = TrainingHistory::default();
        history.push(epoch(1, 40.0));
        history.save_csv(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "epoch,train_loss,train_accuracy,val_accuracy");
        assert_eq!(lines[1], "1,1.000000,50.0000,40.0000");
    }
}
