// ABOUTME: Error taxonomy for the resolve/proxy/upload pipeline
// ABOUTME: Maps each failure kind to an HTTP status and a JSON error body

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or malformed required input
    #[error("{0}")]
    InvalidInput(String),

    /// Required credentials or settings are absent
    #[error("{0}")]
    Configuration(String),

    /// The extraction backend could not produce media for the post
    #[error("{0}")]
    Extraction(String),

    /// A collaborator call failed or returned an unexpected shape
    #[error("{message}")]
    Upstream {
        message: String,
        status: Option<u16>,
    },

    /// The storage provider rejected the upload; status and body preserved
    #[error("Upload rejected with status {status}: {body}")]
    Relay { status: u16, body: String },
}

impl RelayError {
    pub fn upstream(message: impl Into<String>) -> Self {
        RelayError::Upstream {
            message: message.into(),
            status: None,
        }
    }

    pub fn upstream_status(message: impl Into<String>, status: u16) -> Self {
        RelayError::Upstream {
            message: message.into(),
            status: Some(status),
        }
    }

    /// HTTP status the error is served with
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RelayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Extraction(_) => StatusCode::BAD_GATEWAY,
            RelayError::Upstream { status, .. } => status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            RelayError::Relay { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
        }
    }

    /// Upstream HTTP status carried by the error, when one is known
    pub fn upstream_http_status(&self) -> Option<u16> {
        match self {
            RelayError::Upstream { status, .. } => *status,
            RelayError::Relay { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
        });
        if let Some(status) = self.upstream_http_status() {
            body["status"] = serde_json::json!(status);
        }
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RelayError::InvalidInput("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::Configuration("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RelayError::Extraction("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RelayError::upstream("x").status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_relay_error_preserves_provider_status() {
        let err = RelayError::Relay {
            status: 403,
            body: "insufficient permissions".into(),
        };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.upstream_http_status(), Some(403));
        assert!(err.to_string().contains("insufficient permissions"));
    }

    #[test]
    fn test_upstream_status_forwarded() {
        let err = RelayError::upstream_status("Upstream returned status 404", 404);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.upstream_http_status(), Some(404));
    }

    #[test]
    fn test_invalid_relay_status_falls_back_to_bad_gateway() {
        let err = RelayError::Relay {
            status: 42,
            body: String::new(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}
