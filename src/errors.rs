use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{collections::BTreeMap, fmt, io};
use thiserror::Error;
use uuid::Uuid;

/// Per-field (or per-slot) error messages, keyed by the offending field path.
pub type FieldErrors = BTreeMap<String, String>;

/// Failures of the staging pipeline: sessions, uploads, validation, promotion.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("invalid slot key `{0}`")]
    InvalidSlotKey(String),
    #[error("upload session not found, closed, or owned by another user")]
    SessionNotFound,
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("payload exceeds the upload limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("image urls do not match the upload session")]
    SlotMismatch(FieldErrors),
    #[error("theme payload is invalid")]
    Validation(FieldErrors),
    #[error("path `{0}` escapes the storage root")]
    PathTraversal(String),
    #[error("staged file `{0}` is missing")]
    PromotionSourceMissing(String),
    #[error("upload session {0} cannot be promoted into itself")]
    SelfPromotion(Uuid),
    #[error("theme {0} not found")]
    ThemeNotFound(Uuid),
    #[error("theme {0} belongs to another user")]
    Forbidden(Uuid),
    #[error("a theme already exists for upload session {0}")]
    ThemeAlreadyExists(Uuid),
    #[error("another upload session was opened concurrently")]
    SessionConflict,
    #[error("storage misconfigured: {0}")]
    StorageMisconfigured(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StagingResult<T> = Result<T, StagingError>;

impl StagingError {
    /// Single-field validation failure.
    pub fn field(key: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(key.into(), message.into());
        StagingError::Validation(errors)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            StagingError::InvalidSlotKey(_)
            | StagingError::InvalidImage(_)
            | StagingError::SlotMismatch(_)
            | StagingError::Validation(_) => StatusCode::BAD_REQUEST,
            StagingError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            StagingError::SessionNotFound | StagingError::ThemeNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            StagingError::Forbidden(_) => StatusCode::FORBIDDEN,
            StagingError::ThemeAlreadyExists(_) | StagingError::SessionConflict => {
                StatusCode::CONFLICT
            }
            StagingError::PathTraversal(_)
            | StagingError::PromotionSourceMissing(_)
            | StagingError::SelfPromotion(_)
            | StagingError::StorageMisconfigured(_)
            | StagingError::Sqlx(_)
            | StagingError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub errors: Option<FieldErrors>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            errors: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "status": self.status.as_u16()
        });
        if let Some(errors) = self.errors {
            body["errors"] = json!(errors);
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<StagingError> for AppError {
    fn from(err: StagingError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", err);
        }

        let message = err.to_string();
        let errors = match err {
            StagingError::SlotMismatch(errors) | StagingError::Validation(errors) => Some(errors),
            _ => None,
        };

        AppError {
            status,
            message,
            errors,
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
