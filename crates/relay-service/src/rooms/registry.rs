//! `SessionRegistry` - the directory of active rooms.
//!
//! One registry exists per process and is shared (`Arc`) by the room API,
//! every signaling connection, and the eviction task. A single exclusive lock
//! guards the code→session map and every session inside it, so each operation
//! below is atomic with respect to all others. Per-room operations are O(1);
//! [`SessionRegistry::find_room_for_user`] scans every room.
//!
//! Lookups that miss are logged and reported, never fatal.

use super::connection::PeerConnection;
use super::envelope::{Envelope, Role};
use super::session::{Delivery, Session, SessionLimits};
use crate::errors::RelayError;
use crate::observability::metrics;

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant as StdInstant};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Length of generated room codes.
pub const ROOM_CODE_LENGTH: usize = 6;

/// Attempts at finding an unused code before giving up.
const MAX_CODE_ATTEMPTS: u32 = 32;

/// Source of candidate room codes.
pub type CodeGenerator = Box<dyn Fn() -> String + Send + Sync>;

/// Which room a user is in, and in which role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMembership {
    pub room_code: String,
    pub role: Role,
}

/// Concurrency-safe directory of active sessions keyed by room code.
pub struct SessionRegistry {
    rooms: Mutex<HashMap<String, Session>>,
    limits: SessionLimits,
    generate_code: CodeGenerator,
}

impl SessionRegistry {
    /// Create an empty registry using random six-character codes.
    #[must_use]
    pub fn new(limits: SessionLimits) -> Self {
        Self::with_code_generator(limits, Box::new(random_room_code))
    }

    /// Create an empty registry drawing candidate codes from `generate_code`.
    #[must_use]
    pub fn with_code_generator(limits: SessionLimits, generate_code: CodeGenerator) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            limits,
            generate_code,
        }
    }

    /// Create a room for `presenter_id` and return its code.
    ///
    /// Candidate codes are checked against live rooms; a colliding code is
    /// discarded and another drawn.
    #[instrument(skip_all, name = "relay.registry.create_room")]
    pub async fn create_room(&self, presenter_id: &str) -> Result<String, RelayError> {
        let mut rooms = self.rooms.lock().await;

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = (self.generate_code)();
            if code.is_empty() || rooms.contains_key(&code) {
                debug!(
                    target: "relay.registry",
                    attempt,
                    "Room code collision, drawing another"
                );
                continue;
            }

            rooms.insert(code.clone(), Session::new(code.clone(), presenter_id, self.limits));
            metrics::record_room_created();
            metrics::set_rooms_active(rooms.len());

            info!(
                target: "relay.registry",
                room_code = %code,
                total_rooms = rooms.len(),
                "Created room"
            );
            return Ok(code);
        }

        warn!(
            target: "relay.registry",
            attempts = MAX_CODE_ATTEMPTS,
            total_rooms = rooms.len(),
            "Could not find an unused room code"
        );
        Err(RelayError::CodeSpaceExhausted(MAX_CODE_ATTEMPTS))
    }

    /// Remove a room, closing any open connections. Returns whether it existed.
    pub async fn remove_room(&self, code: &str) -> bool {
        let mut rooms = self.rooms.lock().await;

        let Some(mut session) = rooms.remove(code) else {
            warn!(
                target: "relay.registry",
                room_code = %code,
                "Attempted to remove non-existent room"
            );
            return false;
        };

        session.close_connections("room ended");
        metrics::record_room_removed("ended");
        metrics::set_rooms_active(rooms.len());

        info!(target: "relay.registry", room_code = %code, "Removed room");
        true
    }

    /// Whether `code` names an active room.
    pub async fn room_exists(&self, code: &str) -> bool {
        self.rooms.lock().await.contains_key(code)
    }

    /// Number of active rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Find the room whose presenter or viewer slot holds `user_id`.
    ///
    /// This scans every active room while holding the registry lock, which is
    /// fine for tens to low hundreds of rooms. A reverse user→room index would
    /// be needed well before thousands.
    pub async fn find_room_for_user(&self, user_id: &str) -> Option<RoomMembership> {
        let rooms = self.rooms.lock().await;

        rooms.iter().find_map(|(code, session)| {
            session.role_of(user_id).map(|role| RoomMembership {
                room_code: code.clone(),
                role,
            })
        })
    }

    /// Attach the presenter's connection. Returns false if the room is unknown.
    pub async fn join_presenter(&self, code: &str, connection: PeerConnection) -> bool {
        let mut rooms = self.rooms.lock().await;

        let Some(session) = rooms.get_mut(code) else {
            warn!(
                target: "relay.registry",
                room_code = %code,
                "Attempted to join non-existent room as presenter"
            );
            return false;
        };

        let outcome = session.attach_presenter_connection(connection);
        info!(
            target: "relay.registry",
            room_code = %code,
            flushed = outcome.flushed,
            replayed = outcome.replayed,
            failed = outcome.failed,
            "Presenter connected"
        );
        true
    }

    /// Claim the viewer slot for `user_id`. Returns false if the room is unknown.
    pub async fn join_viewer_identity(&self, code: &str, user_id: &str) -> bool {
        let mut rooms = self.rooms.lock().await;

        let Some(session) = rooms.get_mut(code) else {
            warn!(
                target: "relay.registry",
                room_code = %code,
                "Attempted to add viewer to non-existent room"
            );
            return false;
        };

        session.set_viewer_identity(user_id);
        info!(target: "relay.registry", room_code = %code, "Viewer added");
        debug!(target: "relay.registry", room_code = %code, user_id = %user_id, "Viewer identity");
        true
    }

    /// Attach the viewer's connection. Returns false if the room is unknown.
    pub async fn join_viewer_connection(&self, code: &str, connection: PeerConnection) -> bool {
        let mut rooms = self.rooms.lock().await;

        let Some(session) = rooms.get_mut(code) else {
            warn!(
                target: "relay.registry",
                room_code = %code,
                "Attempted to join non-existent room as viewer"
            );
            return false;
        };

        let outcome = session.attach_viewer_connection(connection);
        info!(
            target: "relay.registry",
            room_code = %code,
            flushed = outcome.flushed,
            replayed = outcome.replayed,
            failed = outcome.failed,
            "Viewer connected"
        );
        true
    }

    /// Clear the viewer slot (identity and connection).
    pub async fn leave_viewer(&self, code: &str) {
        let mut rooms = self.rooms.lock().await;

        let Some(session) = rooms.get_mut(code) else {
            warn!(
                target: "relay.registry",
                room_code = %code,
                "Attempted to remove viewer from non-existent room"
            );
            return;
        };

        session.remove_viewer();
        info!(target: "relay.registry", room_code = %code, "Viewer disconnected");
    }

    /// Clear the viewer slot if its connection is still `connection_id`.
    ///
    /// Used when a viewer's read loop ends; a viewer that already reconnected
    /// on a newer connection keeps its slot.
    pub async fn leave_viewer_connection(&self, code: &str, connection_id: &str) {
        let mut rooms = self.rooms.lock().await;

        let Some(session) = rooms.get_mut(code) else {
            debug!(
                target: "relay.registry",
                room_code = %code,
                "Viewer left a room that no longer exists"
            );
            return;
        };

        if session.detach_viewer_connection(connection_id) {
            info!(target: "relay.registry", room_code = %code, "Viewer disconnected");
        } else {
            debug!(
                target: "relay.registry",
                room_code = %code,
                "Replaced viewer connection ended"
            );
        }
    }

    /// Clear the presenter's connection if it is still `connection_id`.
    ///
    /// A newer presenter connection that has already replaced it is left alone.
    pub async fn leave_presenter(&self, code: &str, connection_id: &str) {
        let mut rooms = self.rooms.lock().await;

        let Some(session) = rooms.get_mut(code) else {
            debug!(
                target: "relay.registry",
                room_code = %code,
                "Presenter left a room that no longer exists"
            );
            return;
        };

        if session.detach_presenter_connection(connection_id) {
            info!(target: "relay.registry", room_code = %code, "Presenter disconnected");
        }
    }

    /// Relay a presenter message to the viewer (or buffer it).
    pub async fn send_to_viewer(
        &self,
        code: &str,
        envelope: Envelope,
    ) -> Result<Delivery, RelayError> {
        self.send(code, Role::Viewer, envelope).await
    }

    /// Relay a viewer message to the presenter (or buffer it).
    pub async fn send_to_presenter(
        &self,
        code: &str,
        envelope: Envelope,
    ) -> Result<Delivery, RelayError> {
        self.send(code, Role::Presenter, envelope).await
    }

    /// Remove every room idle for longer than `max_idle`, closing open
    /// connections. Returns the evicted codes.
    pub async fn evict_idle(&self, max_idle: Duration) -> Vec<String> {
        let started = StdInstant::now();
        let mut rooms = self.rooms.lock().await;
        let now = Instant::now();

        let expired: Vec<String> = rooms
            .iter()
            .filter(|(_, session)| session.idle_for(now) > max_idle)
            .map(|(code, _)| code.clone())
            .collect();

        for code in &expired {
            if let Some(mut session) = rooms.remove(code) {
                session.close_connections("room expired");
                metrics::record_room_removed("evicted");
                info!(
                    target: "relay.registry",
                    room_code = %code,
                    idle_seconds = session.idle_for(now).as_secs(),
                    "Removing inactive room"
                );
            }
        }

        metrics::set_rooms_active(rooms.len());
        metrics::record_eviction_sweep(started.elapsed());
        expired
    }

    /// Run `inspect` against the session for `code`, if it exists.
    pub async fn with_session<R>(
        &self,
        code: &str,
        inspect: impl FnOnce(&Session) -> R,
    ) -> Option<R> {
        let rooms = self.rooms.lock().await;
        rooms.get(code).map(inspect)
    }

    async fn send(
        &self,
        code: &str,
        destination: Role,
        envelope: Envelope,
    ) -> Result<Delivery, RelayError> {
        let mut rooms = self.rooms.lock().await;

        let Some(session) = rooms.get_mut(code) else {
            warn!(
                target: "relay.registry",
                room_code = %code,
                destination = %destination,
                "Attempted to send message to non-existent room"
            );
            return Err(RelayError::RoomNotFound(code.to_string()));
        };

        let result = match destination {
            Role::Viewer => session.relay_to_viewer(envelope),
            Role::Presenter => session.relay_to_presenter(envelope),
        };

        result.map_err(|e| {
            warn!(
                target: "relay.registry",
                room_code = %code,
                destination = %destination,
                error = %e,
                "Write to peer failed"
            );
            RelayError::from(e)
        })
    }
}

/// First six hex characters of a random v4 UUID.
fn random_room_code() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(ROOM_CODE_LENGTH)
        .collect()
}
