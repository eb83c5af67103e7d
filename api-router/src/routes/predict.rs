use axum::{extract::State, response::IntoResponse, Json};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use bytes::Bytes;
use serde_json::json;
use tracing::debug;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, TryFromMultipart)]
pub struct PredictParams {
    #[form_data(limit = "10000000")]
    pub file: FieldData<Bytes>,
}

/// Classify one uploaded image. Undecodable payloads are the caller's fault,
/// not ours: 400 with the canonical `Image invalide` detail.
pub async fn predict(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<PredictParams>,
) -> Result<impl IntoResponse, ApiError> {
    let img =
        image::load_from_memory(&input.file.contents).map_err(|_| ApiError::InvalidImage)?;

    let label = state.classifier.predict(&img);
    debug!(prediction = %label, bytes = input.file.contents.len(), "Served prediction");

    Ok(Json(json!({ "prediction": label })))
}
