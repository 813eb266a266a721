//! Training CLI Tool
//!
//! Trains the defect classifier on `<data-dir>/train`, validates on
//! `<data-dir>/val` after every epoch and writes the model directory that
//! `defect-evaluate` and `defect-server` consume.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use defect_core::{load_toml_config, setup_cli_logging, EpochMetrics, TrainConfig};
use defect_training::{
    default_device, Trainer, TrainingBackend, TrainingObserver, TrainingOutcome,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

/// Building Defect Classification Training Tool
#[derive(Parser, Debug)]
#[command(
    name = "defect-train",
    version,
    about = "Train the building defect classifier",
    long_about = "Train the building defect classifier on a folder-per-class image corpus. \
                  Settings come from an optional TOML file and can be overridden per flag."
)]
struct Args {
    /// Path to training configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override data root (expects train/ and val/ inside)
    #[arg(short, long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Override output model directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Override number of epochs
    #[arg(short, long, value_name = "N")]
    epochs: Option<usize>,

    /// Override learning rate
    #[arg(short, long, value_name = "LR")]
    lr: Option<f64>,

    /// Override batch size
    #[arg(short, long, value_name = "SIZE")]
    batch_size: Option<usize>,

    /// Override random seed
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Stop after this many epochs without improvement
    #[arg(long, value_name = "N")]
    patience: Option<usize>,

    /// Initialise the backbone from saved weights
    #[arg(long, value_name = "FILE")]
    pretrained: Option<PathBuf>,

    /// Head size of the --pretrained record
    #[arg(long, value_name = "N", requires = "pretrained")]
    pretrained_classes: Option<usize>,

    /// Disable training-time augmentation
    #[arg(long)]
    no_augment: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Scan the corpus and validate settings without training
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    info!("Building Defect Classification - Training Tool");
    info!("==============================================");

    let mut config = match &args.config {
        Some(path) => load_toml_config::<TrainConfig>(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => TrainConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid training configuration")?;

    print_config_summary(&config);

    let trainer = Trainer::<TrainingBackend>::new(config, default_device())?;

    if args.dry_run {
        let prepared = trainer.prepare().context("Failed to scan dataset")?;
        println!();
        println!("{}", "Dry run".bold());
        println!("  Classes:    {}", prepared.mapping.classes.join(", "));
        println!("  Train:      {} images", prepared.train.samples().len());
        println!("  Validation: {} images", prepared.val.samples().len());
        println!("  Input:      {}x{}", prepared.preprocess.image_size, prepared.preprocess.image_size);
        info!("Configuration validated successfully (dry run)");
        return Ok(());
    }

    let mut observer = ProgressObserver::new()?;
    let outcome = trainer.run(&mut observer).context("Training failed")?;
    print_outcome(&outcome);

    info!("Training completed successfully!");
    Ok(())
}

fn apply_overrides(config: &mut TrainConfig, args: &Args) {
    if let Some(dir) = &args.data_dir {
        config.data.data_dir = dir.clone();
    }
    if let Some(dir) = &args.output {
        config.output.model_dir = dir.clone();
    }
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(lr) = args.lr {
        config.training.learning_rate = lr;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(seed) = args.seed {
        config.training.seed = seed;
    }
    if args.patience.is_some() {
        config.training.early_stopping_patience = args.patience;
    }
    if let Some(path) = &args.pretrained {
        config.model.pretrained_path = Some(path.clone());
        config.model.pretrained_num_classes = args.pretrained_classes;
        if args.pretrained_classes.is_none() {
            warn!("--pretrained given without --pretrained-classes");
        }
    }
    if args.no_augment {
        config.augmentation.enabled = false;
    }
}

fn print_config_summary(config: &TrainConfig) {
    info!("Configuration:");
    info!("  Data dir:      {}", config.data.data_dir.display());
    info!("  Output:        {}", config.output.model_dir.display());
    info!("  Image size:    {}", config.data.image_size);
    info!("  Epochs:        {}", config.training.epochs);
    info!("  Batch size:    {}", config.training.batch_size);
    info!("  Learning rate: {}", config.training.learning_rate);
    info!("  Weight decay:  {}", config.training.weight_decay);
    info!("  Seed:          {}", config.training.seed);
    info!("  Augmentation:  {}", config.augmentation.enabled);
    if let Some(path) = &config.model.pretrained_path {
        info!("  Pretrained:    {}", path.display());
    }
}

fn print_outcome(outcome: &TrainingOutcome) {
    println!();
    println!("{}", "Training summary".bold());
    println!("  Epochs run: {}", outcome.history.epochs.len());
    match outcome.history.best() {
        Some(best) => println!(
            "  Best epoch: {} ({}, train loss {:.4})",
            best.epoch,
            format!("{:.2}%", best.val_accuracy).green(),
            best.train_loss
        ),
        None => println!("  Best epoch: {}", "none".yellow()),
    }
    if outcome.stopped_early {
        println!("  {}", "Stopped early: no improvement within patience".yellow());
    }
    println!("  Model dir:  {}", outcome.model_dir.display());
}

/// Per-epoch progress bar over training batches
struct ProgressObserver {
    style: ProgressStyle,
    bar: Option<ProgressBar>,
    epochs: usize,
}

impl ProgressObserver {
    fn new() -> Result<Self> {
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches {msg}")?
            .progress_chars("=>-");
        Ok(Self {
            style,
            bar: None,
            epochs: 0,
        })
    }
}

impl TrainingObserver for ProgressObserver {
    fn on_epoch_start(&mut self, epoch: usize, epochs: usize, num_batches: usize) {
        self.epochs = epochs;
        let bar = ProgressBar::new(num_batches as u64);
        bar.set_style(self.style.clone());
        bar.set_message(format!("epoch {epoch}/{epochs}"));
        self.bar = Some(bar);
    }

    fn on_batch_end(&mut self, batch: usize, loss: f64, running_accuracy: f64) {
        if let Some(bar) = &self.bar {
            bar.set_position(batch as u64);
            bar.set_message(format!("loss {loss:.4} acc {running_accuracy:.2}%"));
        }
    }

    fn on_validation_start(&mut self, num_samples: usize) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("validating {num_samples} images"));
        }
    }

    fn on_epoch_end(&mut self, metrics: &EpochMetrics, is_best: bool) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        let val = format!("{:.2}%", metrics.val_accuracy);
        let val = if is_best { val.green().bold() } else { val.normal() };
        println!(
            "Epoch {}/{}  loss {:.4}  train {:.2}%  val {}{}",
            metrics.epoch,
            self.epochs,
            metrics.train_loss,
            metrics.train_accuracy,
            val,
            if is_best { "  (best)" } else { "" }
        );
    }
}
