use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Rate limit exceeded: {0}")]
    TooManyRequests(String, u64),
    #[error("External dependency error: {0}")]
    External(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}

impl From<vestry_core::Error> for AppError {
    fn from(error: vestry_core::Error) -> Self {
        match error {
            vestry_core::Error::InvalidInput(message) => Self::BadRequest(message),
            vestry_core::Error::RateLimited { retry_after_secs } => {
                Self::TooManyRequests("Rate limit exceeded".to_string(), retry_after_secs)
            }
            vestry_core::Error::Delivery(message) => Self::External(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Self::TooManyRequests(message, retry_after_secs) = self {
            let body = ErrorBody { error: message };
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [("retry-after", retry_after_secs.to_string())],
                Json(body),
            )
                .into_response();
        }

        let status = match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::External(_) => StatusCode::BAD_GATEWAY,
            Self::TooManyRequests(_, _) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
