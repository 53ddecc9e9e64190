//! Error types for the shim.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ShimError {
    /// The caller's body could not be turned into a chat request.
    #[error("Malformed request: {message}")]
    MalformedRequest { message: String },

    /// No response bytes arrived from the backend.
    #[error("Backend unreachable: {message}")]
    BackendUnreachable { message: String },

    /// The backend dropped the connection after bytes were relayed.
    #[error("Stream truncated: {message}")]
    StreamTruncated { message: String },

    #[error("Audit sink error: {message}")]
    AuditSink { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ShimError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRequest {
            message: msg.into(),
        }
    }

    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::BackendUnreachable {
            message: msg.into(),
        }
    }

    pub fn truncated(msg: impl Into<String>) -> Self {
        Self::StreamTruncated {
            message: msg.into(),
        }
    }

    pub fn audit(msg: impl Into<String>) -> Self {
        Self::AuditSink {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// HTTP status reported to the caller when this error ends a request.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedRequest { .. } => StatusCode::BAD_REQUEST,
            Self::BackendUnreachable { .. } | Self::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Self::MalformedRequest { .. } => "invalid_request_error",
            Self::BackendUnreachable { .. } | Self::Http(_) => "backend_unreachable",
            _ => "internal_error",
        }
    }
}

/// OpenAI-style error envelope, so clients of the source schema can parse it.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl From<&ShimError> for ErrorResponse {
    fn from(err: &ShimError) -> Self {
        Self {
            error: ErrorDetail {
                message: err.to_string(),
                error_type: err.error_type().to_string(),
            },
        }
    }
}

impl IntoResponse for ShimError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(ErrorResponse::from(&self))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ShimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ShimError::malformed("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ShimError::unreachable("x").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ShimError::audit("x").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_body_shape() {
        let body = serde_json::to_value(ErrorResponse::from(&ShimError::malformed(
            "`messages` is required",
        )))
        .unwrap();
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(
            body["error"]["message"],
            "Malformed request: `messages` is required"
        );
    }
}
