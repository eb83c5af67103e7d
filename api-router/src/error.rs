use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    /// The uploaded payload could not be decoded as an image.
    #[error("Image invalide")]
    InvalidImage,

    #[error("Internal server error")]
    InternalError(String),
}

/// FastAPI-compatible error body; the demo front-end reads `detail`.
#[derive(Serialize, Debug)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::InvalidImage => (StatusCode::BAD_REQUEST, "Image invalide".to_string()),
            Self::InternalError(message) => {
                tracing::error!("Internal error: {message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_image_maps_to_400() {
        let response = ApiError::InvalidImage.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_error_is_sanitized() {
        let error = ApiError::InternalError("db password incorrect".to_string());
        assert_eq!(error.to_string(), "Internal server error");

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
