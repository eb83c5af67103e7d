use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use routes::{health::health, predict::predict};

pub mod api_state;
pub mod error;
mod routes;

use api_state::ApiState;

/// Upload size cap for prediction payloads.
const PREDICT_MAX_BODY_BYTES: usize = 10_000_000;

/// Router for the inference service: a liveness probe and the prediction
/// endpoint.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/predict",
            post(predict).layer(DefaultBodyLimit::max(PREDICT_MAX_BODY_BYTES)),
        )
        .with_state(state)
}
