use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use parley_core::{auth, AppState};
use parley_models::user::User;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = body.name.trim();
    let email = normalize_email(&body.email);
    parley_util::validation::validate_display_name(name)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    parley_util::validation::validate_email(&email)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    parley_util::validation::validate_password(&body.password)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if parley_db::users::get_user_by_email(&state.db, &email)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("Email already registered".into()));
    }

    let password_hash = auth::hash_password(&body.password)?;
    let user = parley_db::users::create_user(
        &state.db,
        parley_util::snowflake::generate(1),
        name,
        &email,
        &password_hash,
    )
    .await?;

    let token = auth::create_token(user.id, &state.config.jwt_secret, state.config.jwt_expiry_seconds)?;
    tracing::info!(user_id = user.id, role = user.role.as_str(), "auth: user registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: user.to_model(),
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = normalize_email(&body.email);
    if email.is_empty() || body.password.is_empty() {
        return Err(ApiError::BadRequest("Email and password are required".into()));
    }

    let user = parley_db::users::get_user_by_email(&state.db, &email)
        .await?
        .ok_or(ApiError::Unauthorized)?;
    if !auth::verify_password(&body.password, &user.password_hash)? {
        tracing::debug!(user_id = user.id, "auth: bad password");
        return Err(ApiError::Unauthorized);
    }

    let token = auth::create_token(user.id, &state.config.jwt_secret, state.config.jwt_expiry_seconds)?;
    Ok(Json(AuthResponse {
        user: user.to_model(),
        token,
    }))
}
