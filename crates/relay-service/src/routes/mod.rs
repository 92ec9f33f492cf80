//! HTTP routes for the signaling relay.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::middleware::require_identity;
use crate::rooms::SessionRegistry;
use crate::signaling::{signaling_upgrade, SignalingEndpoint};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The process-wide session registry.
    pub registry: Arc<SessionRegistry>,

    /// Signaling endpoint over the same registry.
    pub endpoint: SignalingEndpoint,

    /// Service configuration.
    pub config: Config,
}

impl AppState {
    /// Build state around an existing registry.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, config: Config) -> Self {
        Self {
            endpoint: SignalingEndpoint::new(Arc::clone(&registry)),
            registry,
            config,
        }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with, under the configured prefix:
/// - `POST /rooms` - Create a room as presenter
/// - `GET /rooms/current` - Caller's room and role
/// - `POST /rooms/:code/viewer` - Claim the viewer slot
/// - `DELETE /rooms/:code` - End a room
/// - `GET /signaling` - WebSocket signaling connection
///
/// Every route requires the identity header. TraceLayer logs requests and a
/// 30 second timeout applies to plain HTTP handlers.
pub fn build_routes(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/rooms", post(handlers::create_room))
        .route("/rooms/current", get(handlers::current_room))
        .route("/rooms/:code/viewer", post(handlers::claim_viewer))
        .route("/rooms/:code", delete(handlers::end_room))
        .route("/signaling", get(signaling_upgrade))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_identity,
        ))
        .with_state(Arc::clone(&state));

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    Router::new()
        .nest(&state.config.api_prefix, api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}
