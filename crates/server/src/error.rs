use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use spendlens_core::{InsightError, InvertedRangeError};
use spendlens_ocr::FailureKind;
use thiserror::Error;

/// Request-scoped failures. None of these affect other requests.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Upload contained no image file")]
    MissingFile,
    #[error("Malformed multipart request: {0}")]
    Multipart(String),
    #[error("{message}")]
    Extraction { kind: FailureKind, message: String },
    #[error("Invalid date range: {0}")]
    InvalidRange(#[from] InvertedRangeError),
    #[error("Malformed JSON request: {0}")]
    InvalidJson(String),
    #[error("{0}")]
    Insight(#[from] InsightError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidJson(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::Multipart(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        // The body limit surfaces here once the stream passes it.
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::Extraction { kind: FailureKind::ImageTooLarge, message: err.body_text() }
        } else {
            ApiError::Multipart(err.body_text())
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingFile
            | ApiError::Multipart(_)
            | ApiError::InvalidRange(_)
            | ApiError::InvalidJson(_)
            | ApiError::Insight(_) => StatusCode::BAD_REQUEST,
            ApiError::Extraction { kind, .. } => match kind {
                FailureKind::InvalidImage => StatusCode::BAD_REQUEST,
                FailureKind::ImageTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
                FailureKind::OcrTimeout => StatusCode::GATEWAY_TIMEOUT,
                FailureKind::OcrFailure => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn kind(&self) -> String {
        match self {
            ApiError::MissingFile => "missing_file".to_string(),
            ApiError::Multipart(_) | ApiError::InvalidJson(_) => "invalid_request".to_string(),
            ApiError::Extraction { kind, .. } => kind.to_string(),
            ApiError::InvalidRange(_) => "invalid_range".to_string(),
            ApiError::Insight(InsightError::TotalOverflow(_)) => "amount_out_of_range".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = %self.kind(), error = %self, "request failed");
        } else {
            tracing::info!(kind = %self.kind(), error = %self, "request rejected");
        }

        let body = match &self {
            // Not receipt uploads, so no confirmation flag.
            ApiError::InvalidRange(_) | ApiError::InvalidJson(_) | ApiError::Insight(_) => json!({
                "error": self.kind(),
                "detail": self.to_string(),
            }),
            _ => json!({
                "success": false,
                "error": self.kind(),
                "detail": self.to_string(),
                "requires_confirmation": true,
            }),
        };
        (status, Json(body)).into_response()
    }
}
