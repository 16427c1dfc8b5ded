mod handler;
mod session;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use parley_core::auth::AuthError;
use parley_core::AppState;
use serde::Deserialize;
use serde_json::json;

pub fn gateway_router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

#[derive(Debug, Default, Deserialize)]
struct HandshakeQuery {
    token: Option<String>,
}

/// The credential is checked before the upgrade so a refused client gets a
/// plain 401 and never touches the registry.
async fn ws_upgrade(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HandshakeQuery>,
) -> Response {
    let Some(credential) = handshake_credential(&headers, query.token) else {
        return unauthorized("Authentication token required");
    };

    let user_id = match state.verifier.verify(&credential) {
        Ok(user_id) => user_id,
        Err(AuthError::MissingToken) => return unauthorized("Authentication token required"),
        Err(err) => {
            tracing::debug!(error = %err, "gateway: handshake rejected");
            return unauthorized("Invalid token");
        }
    };

    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handler::handle_connection(socket, state, user_id))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

/// Bearer header first, then the `token` query parameter.
fn handshake_credential(headers: &HeaderMap, query_token: Option<String>) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|Authorization(bearer)| bearer.token().to_string())
        .or(query_token)
        .filter(|token| !token.trim().is_empty())
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
}
