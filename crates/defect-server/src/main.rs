//! Defect inference server
//!
//! Loads a trained model directory once and serves `POST /predict`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use defect_server::{app, AppState, ServerConfig};
use defect_training::Weights;
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

#[derive(Parser, Debug)]
#[command(name = "defect-server")]
#[command(version)]
#[command(about = "HTTP inference service for building defect classification")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "8000", env = "DEFECT_PORT")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "DEFECT_HOST")]
    host: String,

    /// Model directory written by defect-train
    #[arg(short, long, default_value = "output/models", env = "DEFECT_MODEL_DIR")]
    model_dir: PathBuf,

    /// Which saved weights to serve
    #[arg(long, value_enum, default_value = "best")]
    weights: WeightsArg,

    /// Largest accepted request body in MiB
    #[arg(long, default_value = "20", env = "DEFECT_MAX_BODY_MB")]
    max_body_mb: usize,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    defect_core::setup_cli_logging(cli.verbose)?;

    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        model_dir: cli.model_dir,
        weights: cli.weights.into(),
        max_body_bytes: cli.max_body_mb * 1024 * 1024,
    };

    info!("Defect inference server v{}", env!("CARGO_PKG_VERSION"));
    info!("  Model dir: {:?} ({:?} weights)", config.model_dir, config.weights);
    info!("  Body limit: {} MiB", cli.max_body_mb);

    let state = AppState::load(&config)
        .with_context(|| format!("Failed to load model from {}", config.model_dir.display()))?;
    info!("  Classes:   {:?}", state.classes());

    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app(Arc::new(state)))
        .await
        .context("Server error")?;
    Ok(())
}
