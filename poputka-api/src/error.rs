use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use poputka_booking::BookingError;
use poputka_core::{templates, CoreError, RepositoryError};
use poputka_match::MatchError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Forbidden(String),
    Conflict(String),
    Validation(String),
    Unavailable(String),
    Internal(anyhow::Error),
}

impl AppError {
    pub fn unknown_user(external_id: i64) -> Self {
        AppError::NotFound(format!("User {} not found", external_id))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unavailable(msg) => {
                tracing::error!("Backend unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    templates::TEMPORARILY_UNAVAILABLE.to_string(),
                )
            }
            AppError::Internal(err) => {
                tracing::error!("Internal Server Error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { .. } => AppError::NotFound(err.to_string()),
            RepositoryError::Transition(_) => AppError::Conflict(err.to_string()),
            RepositoryError::Unavailable(_) => AppError::Unavailable(err.to_string()),
            RepositoryError::Corrupt(_) => AppError::Internal(err.into()),
        }
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Repository(e) => e.into(),
            CoreError::Session(e) => AppError::Unavailable(e.to_string()),
        }
    }
}

impl From<MatchError> for AppError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::Repository(e) => e.into(),
        }
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Stale { .. } => AppError::NotFound(err.to_string()),
            BookingError::Forbidden { .. } => AppError::Forbidden(err.to_string()),
            BookingError::AlreadyResolved(_) => AppError::Conflict(err.to_string()),
            BookingError::Unavailable(e) => e.into(),
        }
    }
}
