//! Shared server state.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use defect_core::{Error, Result};
use defect_training::{DefaultBackend, ModelArtifacts, PredictionResult, Predictor, Weights};

/// Largest accepted request body; base64 camera photos run to several MB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory written by the training tool
    pub model_dir: PathBuf,
    pub weights: Weights,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            model_dir: PathBuf::from("output/models"),
            weights: Weights::Best,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen address {}:{}: {e}", self.host, self.port)))
    }
}

/// Immutable after start-up. Forward passes are serialized by the mutex.
pub struct AppState {
    predictor: Mutex<Predictor<DefaultBackend>>,
    classes: Vec<String>,
    started_at: Instant,
    max_body_bytes: usize,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(predictor: Predictor<DefaultBackend>) -> Self {
        let classes = predictor.mapping().classes.clone();
        Self {
            predictor: Mutex::new(predictor),
            classes,
            started_at: Instant::now(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    /// Load the model named by `config` on the default device.
    pub fn load(config: &ServerConfig) -> Result<Self> {
        let artifacts = ModelArtifacts::new(&config.model_dir);
        let predictor = Predictor::from_artifacts(
            &artifacts,
            config.weights,
            defect_training::default_device(),
        )?;
        Ok(Self::new(predictor).with_max_body_bytes(config.max_body_bytes))
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Blocking; call from a blocking thread.
    pub fn classify(&self, bytes: &[u8]) -> Result<PredictionResult> {
        let predictor = self
            .predictor
            .lock()
            .map_err(|_| Error::Model("predictor lock poisoned".into()))?;
        predictor.predict_bytes(bytes)
    }
}
