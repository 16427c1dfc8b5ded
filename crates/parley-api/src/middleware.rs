use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use parley_core::AppState;

use crate::error::ApiError;

/// The caller behind a valid `Authorization: Bearer` token.
pub struct AuthUser {
    pub user_id: i64,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Authorization(bearer) = parts
            .headers
            .typed_get::<Authorization<Bearer>>()
            .ok_or(ApiError::Unauthorized)?;
        let user_id = state.verifier.verify(bearer.token())?;
        Ok(AuthUser { user_id })
    }
}
