use axum::{extract::State, Json};
use parley_core::AppState;
use serde_json::{json, Value};

use crate::middleware::AuthUser;

/// Users with a live gateway session.
pub async fn list_present(State(state): State<AppState>, _auth: AuthUser) -> Json<Value> {
    let online: Vec<String> = state
        .registry
        .list_present()
        .into_iter()
        .map(|id| id.to_string())
        .collect();
    Json(json!({ "online": online }))
}
