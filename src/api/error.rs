use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum ApiError {
    ValidationError(String),

    NotFound(String),

    Unauthorized(String),

    ExternalApiError { service: String, message: String },

    InternalError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            Self::NotFound(msg) => write!(f, "Not found: {msg}"),
            Self::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            Self::ExternalApiError { service, message } => {
                write!(f, "{service} error: {message}")
            }
            Self::InternalError(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            Self::ValidationError(msg) => (StatusCode::BAD_REQUEST, "Bad Request", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "Not Found", msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "Unauthorized", msg),
            Self::ExternalApiError { service, message } => {
                tracing::warn!("{service} API error: {message}");
                (
                    StatusCode::BAD_GATEWAY,
                    "Bad Gateway",
                    format!("{service} is unavailable"),
                )
            }
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error", msg)
            }
        };

        let body = json!({
            "success": false,
            "error": error,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = ?err, "Internal Server Error");
        Self::InternalError(err.to_string())
    }
}

impl ApiError {
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    #[must_use]
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    #[must_use]
    pub fn jikan_error(msg: impl Into<String>) -> Self {
        Self::ExternalApiError {
            service: "Jikan".to_string(),
            message: msg.into(),
        }
    }
}
