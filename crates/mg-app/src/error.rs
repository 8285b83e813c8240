use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mg_core::error::ArtifactError;
use serde_json::json;

/// Error returned by every HTTP handler.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "type": match self.status {
                    StatusCode::BAD_REQUEST => "invalid_request_error",
                    StatusCode::NOT_FOUND => "not_found_error",
                    StatusCode::SERVICE_UNAVAILABLE => "overloaded_error",
                    _ => "server_error",
                },
                "code": self.status.as_str()
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<mg_core::Error> for ApiError {
    fn from(err: mg_core::Error) -> Self {
        match &err {
            mg_core::Error::Validation(_) => ApiError::bad_request(err.to_string()),
            mg_core::Error::NotFound(_) | mg_core::Error::Artifact(ArtifactError::NotFound(_)) => {
                ApiError::not_found(err.to_string())
            }
            mg_core::Error::QueueFull { .. } | mg_core::Error::ShuttingDown => ApiError::unavailable(err.to_string()),
            _ => {
                tracing::error!(error = %err, "request failed");
                ApiError::internal(err.to_string())
            }
        }
    }
}
