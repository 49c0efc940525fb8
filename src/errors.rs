use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors at the store adapter seam.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The code already exists; creation must not overwrite it.
    #[error("code already exists")]
    Conflict,

    /// The backend could not complete the operation. Retryable.
    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// User-visible failure taxonomy. Anything that happens *after* the
/// redirect has been issued (recording, aggregation, notification) never
/// goes through here — those failures are logged and swallowed.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("link not found")]
    NotFound,

    #[error("that short code is already taken")]
    CodeTaken,

    #[error("could not generate a unique code, try again")]
    GenerationExhausted,

    #[error("store temporarily unavailable")]
    TransientStore(#[source] anyhow::Error),

    #[error("{0}")]
    InvalidRequest(String),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::NotFound => StatusCode::NOT_FOUND,
            ServiceError::CodeTaken => StatusCode::CONFLICT,
            // Retryable: the caller should simply try again.
            ServiceError::GenerationExhausted => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };

        if let ServiceError::TransientStore(source) = &self {
            tracing::error!("store error surfaced to caller: {source:#}");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => ServiceError::CodeTaken,
            StoreError::Backend(source) => ServiceError::TransientStore(source),
        }
    }
}
