//! Error types for tsgen-ai
//!
//! Engine errors map onto HTTP status codes; every error body has the
//! shape `{"error": {"code", "message", "details"?}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::session::EngineError;
use crate::sources::SourceError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Sources(#[from] SourceError),

    /// tsgen-common error
    #[error("Common error: {0}")]
    Common(#[from] tsgen_common::Error),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, Option<Value>) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", None),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", None),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None),
            ApiError::Common(_) => (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR", None),
            ApiError::Sources(SourceError::DirectoryNotFound(_)) => {
                (StatusCode::NOT_FOUND, "DATA_DIR_NOT_FOUND", None)
            }
            ApiError::Sources(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SOURCE_ERROR", None),
            ApiError::Engine(err) => match err {
                EngineError::UnknownDocumentType(_) => {
                    (StatusCode::BAD_REQUEST, "UNKNOWN_DOCUMENT_TYPE", None)
                }
                EngineError::InvalidValue { section, field, .. } => (
                    StatusCode::BAD_REQUEST,
                    "INVALID_VALUE",
                    Some(json!({ "section": section, "field": field })),
                ),
                EngineError::SessionNotFound(_) => {
                    (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", None)
                }
                EngineError::FieldNotFound { section, field } => (
                    StatusCode::NOT_FOUND,
                    "FIELD_NOT_FOUND",
                    Some(json!({ "section": section, "field": field })),
                ),
                EngineError::ConflictNotFound { section, field, index } => (
                    StatusCode::NOT_FOUND,
                    "CONFLICT_NOT_FOUND",
                    Some(json!({ "section": section, "field": field, "index": index })),
                ),
                EngineError::InvalidState { expected, actual, .. } => (
                    StatusCode::CONFLICT,
                    "INVALID_STATE",
                    Some(json!({ "expected": expected, "actual": actual })),
                ),
                EngineError::NotReady { fields, .. } => (
                    StatusCode::CONFLICT,
                    "NOT_READY",
                    Some(json!({ "unresolved_fields": fields })),
                ),
                EngineError::FinalizeInProgress(_) => {
                    (StatusCode::CONFLICT, "FINALIZE_IN_PROGRESS", None)
                }
                EngineError::SectionExtractionFailed { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "EXTRACTION_FAILED", None)
                }
                EngineError::RenderFailed { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "RENDER_FAILED", None)
                }
                EngineError::Output { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "OUTPUT_FAILED", None)
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = self.parts();
        let message = match &self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) | ApiError::Internal(msg) => {
                msg.clone()
            }
            other => other.to_string(),
        };

        let mut error = json!({
            "code": error_code,
            "message": message,
        });
        if let Some(details) = details {
            error["details"] = details;
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
