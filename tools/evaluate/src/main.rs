//! Evaluation CLI Tool
//!
//! Runs a trained model directory over a labelled folder-per-class corpus
//! and reports the confusion matrix, per-class accuracy and the
//! misclassified images.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use defect_core::{save_misclassified_csv, setup_cli_logging, EvaluationReport};
use defect_dataset::{DefectDataset, ImageCorpus, ImagePreprocessor};
use defect_training::{default_device, DefaultBackend, Evaluator, ModelArtifacts, Weights};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WeightsArg {
    Best,
    Last,
}

impl From<WeightsArg> for Weights {
    fn from(arg: WeightsArg) -> Self {
        match arg {
            WeightsArg::Best => Weights::Best,
            WeightsArg::Last => Weights::Last,
        }
    }
}

/// Building Defect Model Evaluation Tool
#[derive(Parser, Debug)]
#[command(
    name = "defect-evaluate",
    version,
    about = "Evaluate a trained building defect classifier",
    long_about = "Evaluate a trained model directory on a labelled image folder and report \
                  the confusion matrix, per-class accuracy and misclassified images."
)]
struct Args {
    /// Model directory written by defect-train
    #[arg(short, long, value_name = "DIR", default_value = "output/models")]
    model_dir: PathBuf,

    /// Labelled images, one subdirectory per class
    #[arg(short, long, value_name = "DIR", default_value = "data/val")]
    data_dir: PathBuf,

    /// Which saved weights to evaluate
    #[arg(short, long, value_enum, default_value = "best")]
    weights: WeightsArg,

    /// Batch size for inference
    #[arg(short, long, default_value = "16")]
    batch_size: usize,

    /// Evaluate only the first N images
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// Output directory for results
    #[arg(short, long, value_name = "DIR", default_value = "output/evaluation")]
    output: PathBuf,

    /// Export confusion matrix to CSV
    #[arg(long)]
    export_confusion_matrix: bool,

    /// Export per-class accuracy to CSV
    #[arg(long)]
    export_per_class: bool,

    /// Export every misclassified image to CSV
    #[arg(long)]
    export_misclassified: bool,

    /// How many misclassified images to print
    #[arg(long, value_name = "N", default_value_t = defect_core::DEFAULT_MISCLASSIFIED_LIMIT)]
    show_misclassified: usize,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    info!("Building Defect Classification - Evaluation Tool");
    info!("================================================");

    validate_inputs(&args)?;
    std::fs::create_dir_all(&args.output).context("Failed to create output directory")?;

    let device = default_device();
    let artifacts = ModelArtifacts::new(&args.model_dir);
    let (model, mapping) = artifacts
        .load_model::<DefaultBackend>(args.weights.into(), &device)
        .with_context(|| format!("Failed to load model from {}", args.model_dir.display()))?;
    let preprocess = artifacts.load_preprocess_config()?;

    let mut corpus = ImageCorpus::open_with_mapping(&args.data_dir, &mapping)
        .with_context(|| format!("Failed to scan {}", args.data_dir.display()))?;
    if let Some(limit) = args.limit {
        corpus.truncate(limit);
    }
    corpus.stats().log();

    let dataset = DefectDataset::new(corpus.samples().to_vec(), ImagePreprocessor::new(preprocess));
    let evaluator = Evaluator::new(mapping.classes.clone(), args.batch_size);

    let progress = ProgressBar::new(dataset.samples().len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} images ({eta})")?
            .progress_chars("=>-"),
    );

    info!("Running evaluation...");
    let report = evaluator.evaluate_dataset::<DefaultBackend, _>(&dataset, &device, |images| {
        let rows = images.dims()[0];
        let logits = model.forward(images);
        progress.inc(rows as u64);
        logits
    });
    progress.finish_and_clear();
    let report = report.context("Evaluation failed")?;

    print_results(&report, args.show_misclassified);
    export_results(&report, &args)?;

    info!("Evaluation completed successfully!");
    info!("Results saved to: {}", args.output.display());
    Ok(())
}

fn validate_inputs(args: &Args) -> Result<()> {
    if !args.model_dir.exists() {
        anyhow::bail!("Model directory does not exist: {}", args.model_dir.display());
    }
    if !args.data_dir.exists() {
        anyhow::bail!("Data directory does not exist: {}", args.data_dir.display());
    }
    if args.batch_size == 0 {
        anyhow::bail!("Batch size must be greater than 0");
    }
    Ok(())
}

fn print_results(report: &EvaluationReport, limit: usize) {
    println!();
    println!("{}", report.render(limit));
    let accuracy = format!("{:.2}%", report.accuracy);
    let accuracy = if report.accuracy >= 80.0 {
        accuracy.green().bold()
    } else if report.accuracy >= 50.0 {
        accuracy.yellow().bold()
    } else {
        accuracy.red().bold()
    };
    println!("Accuracy: {accuracy}");
}

fn export_results(report: &EvaluationReport, args: &Args) -> Result<()> {
    let out = |name: &str| args.output.join(name);

    report.save_json(&out("evaluation_summary.json"))?;
    info!("Summary saved to evaluation_summary.json");

    let matrix = report.matrix_report();
    if args.export_confusion_matrix {
        matrix.save_matrix_csv(&out("confusion_matrix.csv"))?;
        info!("Confusion matrix exported to confusion_matrix.csv");
    }
    if args.export_per_class {
        matrix.save_accuracy_csv(&out("per_class_accuracy.csv"))?;
        info!("Per-class accuracy exported to per_class_accuracy.csv");
    }
    if args.export_misclassified {
        save_misclassified_csv(&report.misclassified, &out("misclassified.csv"))?;
        info!("Misclassified images exported to misclassified.csv");
    }
    Ok(())
}
