//! Text and CSV rendering of evaluation results.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::{ConfusionMatrixReport, EvaluationReport, MisclassifiedRecord, Result};

const NAME_WIDTH: usize = 12;
const COLUMN_WIDTH: usize = 15;

fn short(name: &str) -> String {
    name.chars().take(NAME_WIDTH).collect()
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl ConfusionMatrixReport {
    /// Fixed-width table, rows = true class, columns = predicted class.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "{:width$}", "", width = COLUMN_WIDTH);
        for name in &self.class_names {
            let _ = write!(out, "{:>width$}", short(name), width = COLUMN_WIDTH);
        }
        out.push('\n');

        for (name, row) in self.class_names.iter().zip(&self.rows) {
            let _ = write!(out, "{:<width$}", short(name), width = COLUMN_WIDTH);
            for count in row {
                let _ = write!(out, "{:>width$}", count, width = COLUMN_WIDTH);
            }
            out.push('\n');
        }
        out
    }

    /// One `name: 12.34%` line per class.
    pub fn render_accuracy(&self) -> String {
        let mut out = String::new();
        for class in &self.per_class_accuracy {
            let _ = writeln!(out, "{}: {:.2}%", class.class_name, class.accuracy);
        }
        out
    }

    pub fn save_matrix_csv(&self, path: &Path) -> Result<()> {
        let mut content = String::from("True\\Predicted");
        for name in &self.class_names {
            content.push(',');
            content.push_str(&csv_field(name));
        }
        content.push('\n');
        for (name, row) in self.class_names.iter().zip(&self.rows) {
            content.push_str(&csv_field(name));
            for count in row {
                let _ = write!(content, ",{count}");
            }
            content.push('\n');
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn save_accuracy_csv(&self, path: &Path) -> Result<()> {
        let mut content = String::from("class_id,class_name,support,correct,accuracy\n");
        for c in &self.per_class_accuracy {
            let _ = writeln!(
                content,
                "{},{},{},{},{:.4}",
                c.class_id,
                csv_field(&c.class_name),
                c.support,
                c.correct,
                c.accuracy
            );
        }
        fs::write(path, content)?;
        Ok(())
    }
}

/// `File: …` / `True: … | Pred: …` pairs for the given records.
pub fn render_misclassified(records: &[MisclassifiedRecord]) -> String {
    let mut out = String::new();
    for record in records {
        let _ = writeln!(out, "File: {}", record.source);
        let _ = writeln!(
            out,
            "True: {} | Pred: {}",
            record.true_class, record.predicted_class
        );
        out.push('\n');
    }
    out
}

pub fn save_misclassified_csv(records: &[MisclassifiedRecord], path: &Path) -> Result<()> {
    let mut content = String::from("sample_index,source,true_class,predicted_class\n");
    for r in records {
        let _ = writeln!(
            content,
            "{},{},{},{}",
            r.sample_index,
            csv_field(&r.source),
            csv_field(&r.true_class),
            csv_field(&r.predicted_class)
        );
    }
    fs::write(path, content)?;
    Ok(())
}

impl EvaluationReport {
    /// Full console rendering; misclassified list cut at `limit`.
    pub fn render(&self, limit: usize) -> String {
        let matrix = self.matrix_report();
        let mut out = String::new();
        out.push_str("Confusion Matrix:\n");
        out.push_str(&matrix.render_table());
        out.push_str("\nPer-class Accuracy:\n");
        out.push_str(&matrix.render_accuracy());
        let _ = writeln!(
            out,
            "\nOverall: {}/{} correct ({:.2}%)",
            self.correct, self.num_samples, self.accuracy
        );
        let _ = writeln!(
            out,
            "\nMisclassified Images ({} total, showing first {}):",
            self.misclassified.len(),
            self.misclassified_head(limit).len()
        );
        out.push_str(&render_misclassified(self.misclassified_head(limit)));
        out
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
