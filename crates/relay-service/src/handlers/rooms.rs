//! Room lifecycle handlers.
//!
//! These are the outer application's entry points into the registry: start a
//! session, look up the caller's current room, join as viewer, end a session.
//! All routes sit behind the identity middleware.

use crate::errors::RelayError;
use crate::middleware::AuthenticatedUser;
use crate::rooms::{Role, RoomMembership};
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /rooms
///
/// Creates a room with the caller as presenter.
///
/// ## Response
///
/// Returns 201 Created:
///
/// ```json
/// { "roomCode": "3f9a1c", "role": "presenter" }
/// ```
#[instrument(skip_all, name = "relay.handlers.create_room")]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
) -> Result<(StatusCode, Json<RoomMembership>), RelayError> {
    let room_code = state.registry.create_room(&user_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(RoomMembership {
            room_code,
            role: Role::Presenter,
        }),
    ))
}

/// Handler for GET /rooms/current
///
/// Returns the caller's room and role, or 404 if they are in none.
#[instrument(skip_all, name = "relay.handlers.current_room")]
pub async fn current_room(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
) -> Result<Json<RoomMembership>, RelayError> {
    state
        .registry
        .find_room_for_user(&user_id)
        .await
        .map(Json)
        .ok_or_else(|| RelayError::RoomNotFound("no room for user".to_string()))
}

/// Handler for POST /rooms/{code}/viewer
///
/// Claims the viewer slot of `code` for the caller. A previous viewer is
/// replaced.
#[instrument(skip_all, name = "relay.handlers.claim_viewer")]
pub async fn claim_viewer(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Path(code): Path<String>,
) -> Result<Json<RoomMembership>, RelayError> {
    if !state.registry.join_viewer_identity(&code, &user_id).await {
        return Err(RelayError::RoomNotFound(code));
    }

    Ok(Json(RoomMembership {
        room_code: code,
        role: Role::Viewer,
    }))
}

/// Handler for DELETE /rooms/{code}
///
/// Ends the room. Only its presenter may do so; to anyone else the room
/// reads as not found.
#[instrument(skip_all, name = "relay.handlers.end_room")]
pub async fn end_room(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Path(code): Path<String>,
) -> Result<StatusCode, RelayError> {
    let is_presenter = state
        .registry
        .with_session(&code, |session| {
            session.role_of(&user_id) == Some(Role::Presenter)
        })
        .await
        .unwrap_or(false);

    if !is_presenter || !state.registry.remove_room(&code).await {
        return Err(RelayError::RoomNotFound(code));
    }

    Ok(StatusCode::NO_CONTENT)
}
