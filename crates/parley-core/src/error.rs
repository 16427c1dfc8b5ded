use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("database error: {0}")]
    Database(#[from] parley_db::DbError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<parley_util::validation::ValidationError> for CoreError {
    fn from(err: parley_util::validation::ValidationError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<crate::auth::AuthError> for CoreError {
    fn from(err: crate::auth::AuthError) -> Self {
        use crate::auth::AuthError;
        match err {
            AuthError::Internal(msg) => Self::Internal(msg),
            _ => Self::Unauthorized,
        }
    }
}
