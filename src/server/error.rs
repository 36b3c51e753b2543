//! Error responses for the HTTP API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::Error;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Pipeline or store error
    #[error(transparent)]
    Pipeline(#[from] Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::Pipeline(e) => {
                let status = match e {
                    Error::CameraUnavailable(_)
                    | Error::ModelUnavailable(_)
                    | Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.code(), e.to_string())
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request error"
            );
        }

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let not_found = ApiError::NotFound("Photograph not found".to_string()).into_response();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let store = ApiError::from(Error::StoreUnavailable(rusqlite::Error::InvalidQuery))
            .into_response();
        assert_eq!(store.status(), StatusCode::SERVICE_UNAVAILABLE);

        let io = ApiError::from(Error::Io(std::io::Error::other("disk full"))).into_response();
        assert_eq!(io.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
