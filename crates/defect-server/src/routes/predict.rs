//! Defect prediction endpoint

use axum::{extract::State, Json};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use defect_core::Severity;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    /// Base64-encoded image, optionally as a `data:` URL
    pub image: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefectResult {
    pub subject: String,
    pub description: String,
    pub category: String,
    pub severity: Severity,
    pub confidence: f32,
    pub remedy_suggestion: String,
}

impl DefectResult {
    pub fn from_label(label: &str, confidence: f32) -> Self {
        Self {
            subject: label.to_string(),
            description: format!("Detected defect: {label}"),
            category: label.to_string(),
            severity: Severity::Low,
            confidence,
            remedy_suggestion: "Inspection recommended.".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClassesResponse {
    pub classes: Vec<String>,
}

/// Strip an optional `data:<mime>;base64,` prefix and decode.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, ApiError> {
    let encoded = match payload.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(ApiError::BadRequest("image payload is empty".into()));
    }
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| ApiError::BadRequest(format!("invalid base64 image: {e}")))
}

/// POST /predict
pub async fn predict(
    State(state): State<SharedState>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<DefectResult>, ApiError> {
    let bytes = decode_image_payload(&request.image)?;

    let worker = state.clone();
    let result = tokio::task::spawn_blocking(move || worker.classify(&bytes))
        .await
        .map_err(|e| ApiError::Internal(format!("inference task failed: {e}")))??;

    info!(
        "Predicted {} (confidence {:.3}, {:.1}ms)",
        result.class_name, result.confidence, result.inference_time_ms
    );
    Ok(Json(DefectResult::from_label(&result.class_name, result.confidence)))
}

/// GET /classes
pub async fn list_classes(State(state): State<SharedState>) -> Json<ClassesResponse> {
    Json(ClassesResponse {
        classes: state.classes().to_vec(),
    })
}
