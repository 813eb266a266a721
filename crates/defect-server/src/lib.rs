//! HTTP inference service.
//!
//! The model, class mapping and preprocessing are loaded once into an
//! [`AppState`] and shared with every handler.

pub mod error;
pub mod routes;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use state::{AppState, ServerConfig, SharedState, DEFAULT_MAX_BODY_BYTES};

/// Build the router with permissive CORS, request tracing and the state's
/// body limit.
pub fn app(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::health::root))
        .route("/health", get(routes::health::health_check))
        .route("/classes", get(routes::predict::list_classes))
        .route("/predict", post(routes::predict::predict))
        .layer(DefaultBodyLimit::max(state.max_body_bytes()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
