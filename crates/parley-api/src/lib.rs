use axum::{
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use parley_core::AppState;
use serde_json::json;

pub mod error;
pub mod middleware;
pub mod routes;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/health", get(health))
        // Auth
        .route("/api/v1/auth/register", post(routes::auth::register))
        .route("/api/v1/auth/login", post(routes::auth::login))
        // Messages
        .route("/api/v1/messages/users", get(routes::messages::list_users))
        .route(
            "/api/v1/messages/conversations",
            get(routes::messages::list_conversations),
        )
        .route(
            "/api/v1/messages/conversation/{user_id}",
            get(routes::messages::open_conversation),
        )
        .route(
            "/api/v1/messages/messages/{conversation_id}",
            get(routes::messages::conversation_history),
        )
        .route("/api/v1/messages/send", post(routes::messages::send_message))
        // Presence
        .route("/api/v1/presence", get(routes::presence::list_present))
        .layer(build_cors_layer())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn build_cors_layer() -> tower_http::cors::CorsLayer {
    tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "parley" })),
    )
}
