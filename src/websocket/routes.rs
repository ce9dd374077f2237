use axum::extract::State;
use axum::routing::{get, post};
use axum::Json;
use std::sync::Arc;

use crate::rate_limit::IpRateLimiter;
use crate::server::LobbyServer;

use super::game_api::{
    get_game_session, get_return_status, post_player_status, post_return_to_lobby,
};
use super::handler::websocket_handler;

/// Shared router state: the lobby manager plus the per-IP limiters for the
/// unauthenticated game API routes.
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<LobbyServer>,
    pub session_lookup_limiter: Arc<IpRateLimiter>,
    pub return_status_limiter: Arc<IpRateLimiter>,
}

impl AppState {
    pub fn new(server: Arc<LobbyServer>) -> Self {
        let security = &server.config().security;
        let session_lookup_limiter = Arc::new(IpRateLimiter::per_minute(
            security.session_lookup_rate_per_minute,
        ));
        let return_status_limiter = Arc::new(IpRateLimiter::per_minute(
            security.return_status_rate_per_minute,
        ));
        Arc::clone(&session_lookup_limiter).start_cleanup_task();
        Arc::clone(&return_status_limiter).start_cleanup_task();
        Self {
            server,
            session_lookup_limiter,
            return_status_limiter,
        }
    }
}

/// Build the Axum router: lobby socket, external-game HTTP surface, health
/// and metrics.
pub fn create_router(cors_origins: &str) -> axum::Router<AppState> {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let cors = if cors_origins == "*" {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cors_origins
            .split(',')
            .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
            .collect();

        if origins.is_empty() {
            tracing::warn!("No valid CORS origins configured, using permissive CORS");
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    axum::Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/game-sessions/{token}", get(get_game_session))
        .route("/api/returnToLobby", post(post_return_to_lobby))
        .route(
            "/api/v2/rooms/{room_code}/return-status",
            get(get_return_status),
        )
        .route(
            "/api/v2/rooms/{room_code}/players/{player_id}/status",
            post(post_player_status),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health_check(State(state): State<AppState>) -> axum::response::Result<&'static str> {
    if state.server.health_check().await {
        Ok("OK")
    } else {
        Err(axum::http::StatusCode::SERVICE_UNAVAILABLE.into())
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Json<crate::metrics::MetricsSnapshot> {
    Json(state.server.metrics().snapshot())
}
