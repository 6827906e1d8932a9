//! HTTP endpoints for room creation, joining, inspection, and closure.
//!
//! This is the credential-issuing side: create/join mint the signed token
//! that the WebSocket layer later verifies. The real-time core never mints.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::auth::{bearer_token, TOKEN_TTL_DAYS};
use crate::rooms::CloseError;
use crate::state::AppState;
use crate::store::StoreError;
use crate::types::{IdentityClaim, Room, RoomId, User};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub access_code: String,
    pub display_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_code: Option<String>,
    pub active: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub display_name: String,
    pub is_admin: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub room: RoomSummary,
    pub user: UserSummary,
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: String,
    pub display_name: String,
    pub is_admin: bool,
    pub joined_at: DateTime<Utc>,
    /// Whether the user has a live connection right now
    pub online: bool,
}

#[derive(Debug, Serialize)]
pub struct RoomDetailsResponse {
    pub room: RoomSummary,
    pub users: Vec<RosterEntry>,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn store_error_response(e: StoreError) -> Response {
    tracing::error!("Store failure: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "store unavailable")
}

fn session_response(room: &Room, user: &User, token: String, with_code: bool) -> SessionResponse {
    SessionResponse {
        room: RoomSummary {
            id: room.id.clone(),
            name: room.name.clone(),
            access_code: with_code.then(|| room.access_code.clone()),
            active: room.active,
        },
        user: UserSummary {
            id: user.id.clone(),
            display_name: user.display_name.clone(),
            is_admin: user.is_admin,
        },
        token,
    }
}

/// Create a room and its admin user.
///
/// POST /api/rooms
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRoomRequest>,
) -> Response {
    if req.name.trim().is_empty() || req.display_name.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "room name and display name are required",
        );
    }

    // The admin user exists before the room, then gets tied to it
    let admin = match state.users.create_user(req.display_name.trim(), None, true).await {
        Ok(user) => user,
        Err(e) => return store_error_response(e),
    };
    let room = match state.rooms.create_room(req.name.trim(), &admin.id).await {
        Ok(room) => room,
        Err(e) => return store_error_response(e),
    };
    if let Err(e) = state.users.update_room_id(&admin.id, &room.id).await {
        return store_error_response(e);
    }

    let claim = IdentityClaim {
        user_id: admin.id.clone(),
        room_id: room.id.clone(),
        is_admin: true,
    };
    let token = match state.auth.issue(&claim, Duration::days(TOKEN_TTL_DAYS)) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!("Token signing failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to issue token");
        }
    };

    tracing::info!(room = %room.id, admin = %admin.id, "Room created");
    (
        StatusCode::CREATED,
        Json(session_response(&room, &admin, token, true)),
    )
        .into_response()
}

/// Join an active room by access code.
///
/// POST /api/rooms/join
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JoinRoomRequest>,
) -> Response {
    if req.access_code.trim().is_empty() || req.display_name.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "access code and display name are required",
        );
    }

    let room = match state.rooms.find_by_access_code(req.access_code.trim()).await {
        Ok(Some(room)) => room,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "room not found or inactive"),
        Err(e) => return store_error_response(e),
    };

    let user = match state
        .users
        .create_user(req.display_name.trim(), Some(&room.id), false)
        .await
    {
        Ok(user) => user,
        Err(e) => return store_error_response(e),
    };

    let claim = IdentityClaim {
        user_id: user.id.clone(),
        room_id: room.id.clone(),
        is_admin: false,
    };
    let token = match state.auth.issue(&claim, Duration::days(TOKEN_TTL_DAYS)) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!("Token signing failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to issue token");
        }
    };

    tracing::info!(room = %room.id, user = %user.id, "User joined room");
    (
        StatusCode::CREATED,
        Json(session_response(&room, &user, token, false)),
    )
        .into_response()
}

/// Room details plus the current roster with live-presence flags. Only
/// holders of a token scoped to this room may look.
///
/// GET /api/rooms/{room_id}
pub async fn room_details(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    headers: HeaderMap,
) -> Response {
    let claim = match state.auth.authenticate(bearer_token(&headers)) {
        Ok(claim) => claim,
        Err(e) => return error_response(StatusCode::UNAUTHORIZED, &e.to_string()),
    };
    if claim.room_id != room_id {
        return error_response(
            StatusCode::FORBIDDEN,
            "token does not grant access to this room",
        );
    }

    let room = match state.rooms.get_room(&room_id).await {
        Ok(Some(room)) => room,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "room not found"),
        Err(e) => return store_error_response(e),
    };
    if !room.active {
        return error_response(StatusCode::FORBIDDEN, "room is no longer active");
    }

    let users = match state.users.users_in_room(&room.id).await {
        Ok(users) => users,
        Err(e) => return store_error_response(e),
    };

    let mut roster = Vec::with_capacity(users.len());
    for user in users {
        let online = state.presence.is_present(&room.id, &user.id).await;
        roster.push(RosterEntry {
            id: user.id,
            display_name: user.display_name,
            is_admin: user.is_admin,
            joined_at: user.joined_at,
            online,
        });
    }

    Json(RoomDetailsResponse {
        room: RoomSummary {
            id: room.id,
            name: room.name,
            access_code: None,
            active: room.active,
        },
        users: roster,
    })
    .into_response()
}

/// Close a room over HTTP. Same coordinator path as the WebSocket
/// `room.close` event, so connected members get notified and evicted.
///
/// PUT /api/rooms/{room_id}/close
pub async fn close_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    headers: HeaderMap,
) -> Response {
    let claim = match state.auth.authenticate(bearer_token(&headers)) {
        Ok(claim) => claim,
        Err(e) => return error_response(StatusCode::UNAUTHORIZED, &e.to_string()),
    };
    if claim.room_id != room_id {
        return error_response(
            StatusCode::FORBIDDEN,
            "token does not grant access to this room",
        );
    }

    match state
        .coordinator
        .close(&room_id, &claim.user_id, claim.is_admin)
        .await
    {
        Ok(()) => Json(json!({ "message": "room closed" })).into_response(),
        Err(CloseError::NotAdmin) => {
            error_response(StatusCode::FORBIDDEN, "only the room admin can close the room")
        }
        Err(CloseError::Store(StoreError::NotFound)) => {
            error_response(StatusCode::NOT_FOUND, "room not found")
        }
        Err(CloseError::Store(e)) => store_error_response(e),
    }
}
