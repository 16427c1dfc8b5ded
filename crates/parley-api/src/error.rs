use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parley_core::auth::AuthError;
use parley_core::error::CoreError;
use parley_core::relay::RelayError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("rate limited")]
    RateLimited,
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(err) => {
                tracing::error!("API internal error: {err:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = self.to_string();
        (status, Json(json!({ "error": message, "message": message }))).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::NotFound => ApiError::NotFound,
            CoreError::Unauthorized => ApiError::Unauthorized,
            CoreError::BadRequest(msg) => ApiError::BadRequest(msg),
            CoreError::Conflict(msg) => ApiError::Conflict(msg),
            CoreError::Database(err) => ApiError::Internal(anyhow::anyhow!(err)),
            CoreError::Internal(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl From<parley_db::DbError> for ApiError {
    fn from(e: parley_db::DbError) -> Self {
        match e {
            parley_db::DbError::NotFound => ApiError::NotFound,
            parley_db::DbError::Conflict(msg) => ApiError::Conflict(msg),
            parley_db::DbError::Sqlx(err) => ApiError::Internal(anyhow::anyhow!(err)),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            RelayError::RateLimited => ApiError::RateLimited,
            RelayError::Persistence(err) => {
                ApiError::Internal(anyhow::anyhow!(err).context("failed to send message"))
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Internal(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
            _ => ApiError::Unauthorized,
        }
    }
}
