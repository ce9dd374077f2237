use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::auth::{AuthError, ServiceIdentity, API_KEY_HEADER};
use crate::protocol::{ErrorCode, LobbyError, UserId};
use crate::server::{ReportedStatus, ReturnCaller};
use crate::session::SessionMetadata;

use super::routes::AppState;

/// HTTP-facing error body: `{ "error": ..., "code": ... }`.
pub(super) struct ApiError {
    status: StatusCode,
    code: ErrorCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn rate_limited() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::Forbidden,
            "Rate limit exceeded, slow down",
        )
    }
}

impl From<LobbyError> for ApiError {
    fn from(error: LobbyError) -> Self {
        let status = match error.code() {
            ErrorCode::Validation => StatusCode::BAD_REQUEST,
            ErrorCode::RoomNotFound | ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::RoomNotAvailable | ErrorCode::SessionExpired => StatusCode::GONE,
            ErrorCode::RoomFull | ErrorCode::DuplicateName | ErrorCode::Conflict => {
                StatusCode::CONFLICT
            }
            ErrorCode::Unauthorized | ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.code(), error.client_message())
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MissingApiKey | AuthError::InvalidApiKey => Self::new(
                StatusCode::UNAUTHORIZED,
                ErrorCode::Unauthorized,
                error.to_string(),
            ),
            AuthError::RoomOutOfScope { .. } => Self::new(
                StatusCode::FORBIDDEN,
                ErrorCode::Unauthorized,
                error.to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message, "code": self.code });
        (self.status, Json(body)).into_response()
    }
}

fn require_api_key(state: &AppState, headers: &HeaderMap) -> Result<ServiceIdentity, ApiError> {
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingApiKey)?;
    let identity = state
        .server
        .api_keys()
        .validate(presented)
        .map_err(ApiError::from)?;
    Ok(identity)
}

// --- GET /api/game-sessions/{token} -----------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GameSessionResponse {
    room_code: String,
    game_type: String,
    streamer_mode: bool,
    player_id: UserId,
    metadata: SessionMetadata,
    expires_at: DateTime<Utc>,
}

/// Token resolution. The token itself is the credential, so no API key is
/// required, but the route is rate limited per IP.
pub(super) async fn get_game_session(
    Path(token): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Result<Json<GameSessionResponse>, ApiError> {
    if !state.session_lookup_limiter.allow(addr.ip()).await {
        return Err(ApiError::rate_limited());
    }

    let record = state
        .server
        .sessions()
        .resolve(&token)
        .await
        .map_err(|err| ApiError::from(LobbyError::Internal(err)))?
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                ErrorCode::NotFound,
                "Session token does not exist or has expired",
            )
        })?;

    Ok(Json(GameSessionResponse {
        room_code: record.room_code,
        game_type: record.game_type,
        streamer_mode: record.streamer_mode,
        player_id: record.user_id,
        metadata: record.metadata,
        expires_at: record.expires_at,
    }))
}

// --- POST /api/returnToLobby -------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ReturnToLobbyRequest {
    room_code: String,
    #[serde(default)]
    #[allow(dead_code)]
    is_host: Option<bool>,
    /// When false the room terminates as finished instead of returning.
    #[serde(default)]
    return_players: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ReturnToLobbyResponse {
    success: bool,
    players_affected: usize,
    return_url: String,
    poll_endpoint: String,
}

pub(super) async fn post_return_to_lobby(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ReturnToLobbyRequest>,
) -> Result<Json<ReturnToLobbyResponse>, ApiError> {
    let identity = require_api_key(&state, &headers)?;
    let room_code = request.room_code.trim().to_ascii_uppercase();
    let return_players = request.return_players.unwrap_or(true);

    let outcome = state
        .server
        .end_game(&room_code, ReturnCaller::Service(identity), return_players)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(ReturnToLobbyResponse {
        success: true,
        players_affected: outcome.players_affected,
        return_url: outcome.return_url,
        poll_endpoint: format!("/api/v2/rooms/{room_code}/return-status"),
    }))
}

// --- GET /api/v2/rooms/{room_code}/return-status ------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ReturnStatusQuery {
    player_id: UserId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ReturnStatusResponse {
    should_return: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    return_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_token: Option<String>,
    timestamp: DateTime<Utc>,
}

/// Polling fallback for games that lost the lobby socket. Rate limited per
/// IP; the signal is delivered at most once per member per return cycle.
pub(super) async fn get_return_status(
    Path(room_code): Path<String>,
    Query(query): Query<ReturnStatusQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Result<Json<ReturnStatusResponse>, ApiError> {
    if !state.return_status_limiter.allow(addr.ip()).await {
        return Err(ApiError::rate_limited());
    }

    let room_code = room_code.trim().to_ascii_uppercase();
    let status = state
        .server
        .poll_return_status(&room_code, query.player_id)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(ReturnStatusResponse {
        should_return: status.should_return,
        return_url: status.return_url,
        session_token: status.session_token,
        timestamp: Utc::now(),
    }))
}

// --- POST /api/v2/rooms/{room_code}/players/{player_id}/status ----------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PlayerStatusRequest {
    status: ReportedStatus,
    #[serde(default)]
    #[allow(dead_code)]
    location: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub(super) struct PlayerStatusResponse {
    success: bool,
}

pub(super) async fn post_player_status(
    Path((room_code, player_id)): Path<(String, UserId)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PlayerStatusRequest>,
) -> Result<Json<PlayerStatusResponse>, ApiError> {
    let identity = require_api_key(&state, &headers)?;
    let room_code = room_code.trim().to_ascii_uppercase();

    state
        .server
        .report_player_status(&room_code, player_id, request.status, &identity)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(PlayerStatusResponse { success: true }))
}
