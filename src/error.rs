use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Failures surfaced by the store, the status source and background tasks.
///
/// The pipeline only distinguishes soft fetch failures, which drop one
/// identifier, from everything else, which aborts that identifier's upsert.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("user not found: {0}")]
    NotFound(String),
    #[error("store query failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("store unavailable: {0}")]
    Storage(String),
    #[error("status source request failed: {0}")]
    StatusSource(#[from] reqwest::Error),
    #[error("status source response could not be decoded: {0}")]
    Decode(String),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Failures of the status source that drop a single identifier.
    pub fn is_soft_fetch_failure(&self) -> bool {
        matches!(self, Self::StatusSource(_) | Self::Decode(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::StatusSource(_) | Self::Decode(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Migration(_) | Self::Storage(_) | Self::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Text safe to hand to a caller; driver and task details stay in logs.
    fn public_message(self) -> String {
        match self {
            Self::Validation(msg) | Self::NotFound(msg) | Self::Storage(msg) => msg,
            Self::Database(_) | Self::Migration(_) => "store operation failed".to_string(),
            Self::StatusSource(_) | Self::Decode(_) => "status source unavailable".to_string(),
            Self::Task(_) => "internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}
