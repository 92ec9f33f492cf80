//! Identity middleware.
//!
//! Authentication happens upstream. The fronting proxy verifies the caller and
//! forwards the user ID in a configured header; this layer only requires that
//! header to be present and stores the ID in request extensions for handlers.

use crate::errors::RelayError;
use crate::routes::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// Verified user ID for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Reject requests without an identity header; otherwise attach
/// [`AuthenticatedUser`] to the request.
///
/// # Response
///
/// - Returns 401 Unauthorized if the header is missing, empty or not valid text
#[instrument(skip_all, name = "relay.middleware.auth")]
pub async fn require_identity(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, RelayError> {
    let user_id = req
        .headers()
        .get(state.config.identity_header.as_str())
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            tracing::debug!(target: "relay.middleware.auth", "Missing identity header");
            RelayError::Unauthenticated("Missing identity header".to_string())
        })?
        .to_string();

    req.extensions_mut().insert(AuthenticatedUser(user_id));

    Ok(next.run(req).await)
}
