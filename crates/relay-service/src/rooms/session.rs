//! Per-room signaling state and delivery policy.
//!
//! A `Session` owns both peer slots of one room. Messages addressed to a peer
//! without a live connection are queued; offers and answers are additionally
//! cached per track type so a (re)connecting peer can recover the other side's
//! negotiation state without anyone resending.
//!
//! # Delivery
//!
//! Delivery is best-effort. A failed send is reported to the caller, but the
//! cache update that preceded it is kept.
//!
//! # Attach
//!
//! Attaching a connection, in one step:
//! 1. flushes the peer's pending queue in FIFO order and clears it
//! 2. replays the other peer's cached offers, then its cached answers,
//!    skipping any envelope the flush already delivered
//!
//! Sessions are not internally synchronized; the registry's lock guards them.

use super::connection::PeerConnection;
use super::envelope::{Envelope, EnvelopeKind, Role};
use crate::errors::DeliveryError;
use crate::observability::metrics;

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Close reason sent to a connection displaced by a newer one for the same role.
pub const CLOSE_REASON_REPLACED: &str = "replaced";

/// Default cap on messages buffered for one absent peer.
pub const DEFAULT_MAX_PENDING_MESSAGES: usize = 512;

/// Default cap on distinct track types cached per direction and kind.
pub const DEFAULT_MAX_CACHED_TRACKS: usize = 16;

/// Resource bounds applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Maximum queued messages per peer; the oldest is dropped beyond this.
    pub max_pending_messages: usize,
    /// Maximum distinct track types per offer/answer cache; new track types
    /// beyond this are relayed but not cached.
    pub max_cached_tracks: usize,
}

impl SessionLimits {
    /// Smallest connection buffer that takes a full attach without loss: a
    /// full pending queue plus a full offer cache and a full answer cache.
    #[must_use]
    pub const fn required_connection_buffer(&self) -> usize {
        self.max_pending_messages
            .saturating_add(self.max_cached_tracks.saturating_mul(2))
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_pending_messages: DEFAULT_MAX_PENDING_MESSAGES,
            max_cached_tracks: DEFAULT_MAX_CACHED_TRACKS,
        }
    }
}

/// Identity and live connection for one role.
#[derive(Debug, Default)]
pub struct PeerSlot {
    identity: Option<String>,
    connection: Option<PeerConnection>,
}

impl PeerSlot {
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    #[must_use]
    pub fn connection(&self) -> Option<&PeerConnection> {
        self.connection.as_ref()
    }
}

/// Everything the session tracks for one side.
#[derive(Debug, Default)]
struct PeerState {
    slot: PeerSlot,
    /// Messages addressed to this peer while it has no connection.
    pending: VecDeque<Envelope>,
    /// Last offer sent by this peer, per track type.
    last_offers: BTreeMap<String, Envelope>,
    /// Last answer sent by this peer, per track type.
    last_answers: BTreeMap<String, Envelope>,
}

impl PeerState {
    /// Cache an offer/answer sent by this peer. Returns false if the envelope
    /// was not cached because the cache is at capacity.
    fn remember(&mut self, envelope: &Envelope, max_tracks: usize) -> bool {
        let cache = match envelope.kind {
            EnvelopeKind::Offer => &mut self.last_offers,
            EnvelopeKind::Answer => &mut self.last_answers,
            EnvelopeKind::Candidate => return true,
        };

        if !cache.contains_key(&envelope.track_type) && cache.len() >= max_tracks {
            return false;
        }

        cache.insert(envelope.track_type.clone(), envelope.clone());
        true
    }
}

/// Counts from attaching a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttachOutcome {
    /// Queued messages handed to the new connection.
    pub flushed: usize,
    /// Cached offers/answers replayed from the other peer.
    pub replayed: usize,
    /// Sends that failed (already counted in `flushed`/`replayed`).
    pub failed: usize,
}

/// Result of relaying one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the destination's live connection.
    Sent,
    /// Queued until the destination connects.
    Buffered,
}

/// One room's authoritative state.
#[derive(Debug)]
pub struct Session {
    code: String,
    last_active_at: Instant,
    presenter: PeerState,
    viewer: PeerState,
    limits: SessionLimits,
}

impl Session {
    /// Create a session with the presenter identity pre-registered.
    #[must_use]
    pub fn new(
        code: impl Into<String>,
        presenter_id: impl Into<String>,
        limits: SessionLimits,
    ) -> Self {
        let mut presenter = PeerState::default();
        presenter.slot.identity = Some(presenter_id.into());

        Self {
            code: code.into(),
            last_active_at: Instant::now(),
            presenter,
            viewer: PeerState::default(),
            limits,
        }
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn last_active_at(&self) -> Instant {
        self.last_active_at
    }

    /// Time since the last mutating operation, as seen at `now`.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_active_at)
    }

    #[must_use]
    pub fn slot(&self, role: Role) -> &PeerSlot {
        &self.peer(role).slot
    }

    #[must_use]
    pub fn is_connected(&self, role: Role) -> bool {
        self.peer(role).slot.connection.is_some()
    }

    /// Number of messages waiting for `role` to connect.
    #[must_use]
    pub fn pending_len(&self, role: Role) -> usize {
        self.peer(role).pending.len()
    }

    /// Cached offer or answer sent by `from` for `track_type`.
    #[must_use]
    pub fn cached(
        &self,
        from: Role,
        kind: EnvelopeKind,
        track_type: &str,
    ) -> Option<&Envelope> {
        let peer = self.peer(from);
        match kind {
            EnvelopeKind::Offer => peer.last_offers.get(track_type),
            EnvelopeKind::Answer => peer.last_answers.get(track_type),
            EnvelopeKind::Candidate => None,
        }
    }

    /// The role whose slot holds `user_id`, presenter checked first.
    #[must_use]
    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        if self.presenter.slot.identity() == Some(user_id) {
            Some(Role::Presenter)
        } else if self.viewer.slot.identity() == Some(user_id) {
            Some(Role::Viewer)
        } else {
            None
        }
    }

    /// Install the presenter's connection, flushing and replaying state.
    pub fn attach_presenter_connection(&mut self, connection: PeerConnection) -> AttachOutcome {
        self.attach(Role::Presenter, connection)
    }

    /// Install the viewer's connection, flushing and replaying state.
    pub fn attach_viewer_connection(&mut self, connection: PeerConnection) -> AttachOutcome {
        self.attach(Role::Viewer, connection)
    }

    /// Record a viewer claim without a connection.
    pub fn set_viewer_identity(&mut self, user_id: impl Into<String>) {
        self.touch();
        self.viewer.slot.identity = Some(user_id.into());
    }

    /// Clear the viewer slot. Safe to call on an empty slot.
    pub fn remove_viewer(&mut self) {
        self.touch();
        self.viewer.slot = PeerSlot::default();
    }

    /// Clear the viewer slot if its connection is still `connection_id`.
    ///
    /// A viewer that has already reconnected on a newer connection is left
    /// alone. Returns whether the slot was cleared.
    pub fn detach_viewer_connection(&mut self, connection_id: &str) -> bool {
        let current = self.viewer.slot.connection.as_ref().map(PeerConnection::id);
        if current != Some(connection_id) {
            return false;
        }

        self.remove_viewer();
        true
    }

    /// Clear the presenter's connection if it is still `connection_id`.
    ///
    /// The presenter identity is kept; later messages for the presenter are
    /// buffered until it reconnects. Returns whether the slot was cleared.
    pub fn detach_presenter_connection(&mut self, connection_id: &str) -> bool {
        let current = self.presenter.slot.connection.as_ref().map(PeerConnection::id);
        if current != Some(connection_id) {
            return false;
        }

        self.touch();
        self.presenter.slot.connection = None;
        true
    }

    /// Relay a message from the presenter to the viewer.
    pub fn relay_to_viewer(&mut self, envelope: Envelope) -> Result<Delivery, DeliveryError> {
        self.relay(Role::Viewer, envelope)
    }

    /// Relay a message from the viewer to the presenter.
    pub fn relay_to_presenter(&mut self, envelope: Envelope) -> Result<Delivery, DeliveryError> {
        self.relay(Role::Presenter, envelope)
    }

    /// Ask both live connections to close and clear them from their slots.
    pub fn close_connections(&mut self, reason: &str) {
        for peer in [&mut self.presenter, &mut self.viewer] {
            if let Some(connection) = peer.slot.connection.take() {
                if let Err(e) = connection.close(reason) {
                    debug!(
                        target: "relay.session",
                        room_code = %self.code,
                        connection_id = %connection.id(),
                        error = %e,
                        "Close frame not delivered"
                    );
                }
            }
        }
    }

    fn touch(&mut self) {
        self.last_active_at = Instant::now();
    }

    fn peer(&self, role: Role) -> &PeerState {
        match role {
            Role::Presenter => &self.presenter,
            Role::Viewer => &self.viewer,
        }
    }

    /// Split into (source, destination) for a message addressed to `destination`.
    fn sides_mut<'a>(
        presenter: &'a mut PeerState,
        viewer: &'a mut PeerState,
        destination: Role,
    ) -> (&'a mut PeerState, &'a mut PeerState) {
        match destination {
            Role::Viewer => (presenter, viewer),
            Role::Presenter => (viewer, presenter),
        }
    }

    fn attach(&mut self, role: Role, connection: PeerConnection) -> AttachOutcome {
        self.touch();

        let (other, target) = Self::sides_mut(&mut self.presenter, &mut self.viewer, role);
        let mut outcome = AttachOutcome::default();

        let flushed: Vec<Envelope> = target.pending.drain(..).collect();
        let replay: Vec<&Envelope> = other
            .last_offers
            .values()
            .chain(other.last_answers.values())
            .filter(|cached| !flushed.contains(cached))
            .collect();

        let needed = flushed.len() + replay.len();
        if needed > connection.max_capacity() {
            warn!(
                target: "relay.session",
                room_code = %self.code,
                role = %role,
                needed,
                capacity = connection.max_capacity(),
                "Connection buffer smaller than attach backlog, excess will be dropped"
            );
        }

        for envelope in &flushed {
            outcome.flushed += 1;
            if deliver(&connection, envelope.clone(), role).is_err() {
                outcome.failed += 1;
            }
        }

        for envelope in replay {
            outcome.replayed += 1;
            if deliver(&connection, envelope.clone(), role).is_err() {
                outcome.failed += 1;
            }
        }

        if let Some(displaced) = target.slot.connection.replace(connection) {
            debug!(
                target: "relay.session",
                room_code = %self.code,
                role = %role,
                connection_id = %displaced.id(),
                "Closing replaced connection"
            );
            if let Err(e) = displaced.close(CLOSE_REASON_REPLACED) {
                debug!(
                    target: "relay.session",
                    room_code = %self.code,
                    error = %e,
                    "Replaced connection already gone"
                );
            }
        }
        outcome
    }

    fn relay(&mut self, destination: Role, envelope: Envelope) -> Result<Delivery, DeliveryError> {
        self.touch();

        let limits = self.limits;
        let (source, target) = Self::sides_mut(&mut self.presenter, &mut self.viewer, destination);

        if !source.remember(&envelope, limits.max_cached_tracks) {
            warn!(
                target: "relay.session",
                room_code = %self.code,
                track_type = %envelope.track_type,
                max_cached_tracks = limits.max_cached_tracks,
                "Track cache full, message relayed without caching"
            );
        }

        if let Some(connection) = &target.slot.connection {
            return deliver(connection, envelope, destination).map(|()| Delivery::Sent);
        }

        if target.pending.len() >= limits.max_pending_messages {
            target.pending.pop_front();
            metrics::record_message_dropped(destination);
            warn!(
                target: "relay.session",
                room_code = %self.code,
                destination = %destination,
                max_pending_messages = limits.max_pending_messages,
                "Pending queue full, dropped oldest message"
            );
        }

        target.pending.push_back(envelope);
        metrics::record_message_buffered(destination);
        Ok(Delivery::Buffered)
    }
}

/// Hand one envelope to a connection, recording the outcome.
fn deliver(
    connection: &PeerConnection,
    envelope: Envelope,
    destination: Role,
) -> Result<(), DeliveryError> {
    let kind = envelope.kind;
    match connection.send(envelope) {
        Ok(()) => {
            metrics::record_message_relayed(destination, kind);
            Ok(())
        }
        Err(e) => {
            metrics::record_delivery_failure(e.as_label());
            Err(e)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::rooms::connection::OutboundFrame;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn connect() -> (PeerConnection, mpsc::Receiver<OutboundFrame>) {
        PeerConnection::channel(64)
    }

    fn received(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let OutboundFrame::Envelope(envelope) = frame {
                out.push(envelope);
            }
        }
        out
    }

    fn offer(track: &str, sdp: &str) -> Envelope {
        Envelope::new(EnvelopeKind::Offer, track, json!({ "sdp": sdp }))
    }

    fn answer(track: &str, sdp: &str) -> Envelope {
        Envelope::new(EnvelopeKind::Answer, track, json!({ "sdp": sdp }))
    }

    fn candidate(track: &str, n: u32) -> Envelope {
        Envelope::new(EnvelopeKind::Candidate, track, json!({ "candidate": n }))
    }

    fn session() -> Session {
        Session::new("abc123", "p1", SessionLimits::default())
    }

    #[test]
    fn test_new_session_registers_presenter_identity() {
        let session = session();
        assert_eq!(session.code(), "abc123");
        assert_eq!(session.slot(Role::Presenter).identity(), Some("p1"));
        assert_eq!(session.slot(Role::Viewer).identity(), None);
        assert!(!session.is_connected(Role::Presenter));
    }

    #[test]
    fn test_relay_to_absent_viewer_buffers() {
        let mut session = session();

        let delivery = session.relay_to_viewer(candidate("camera", 1)).unwrap();

        assert_eq!(delivery, Delivery::Buffered);
        assert_eq!(session.pending_len(Role::Viewer), 1);
    }

    #[test]
    fn test_attach_flushes_pending_in_order_and_clears() {
        let mut session = session();
        for n in 0..3 {
            session.relay_to_viewer(candidate("camera", n)).unwrap();
        }

        let (conn, mut rx) = connect();
        let outcome = session.attach_viewer_connection(conn);

        assert_eq!(outcome.flushed, 3);
        assert_eq!(outcome.failed, 0);
        assert_eq!(session.pending_len(Role::Viewer), 0);
        assert_eq!(
            received(&mut rx),
            vec![candidate("camera", 0), candidate("camera", 1), candidate("camera", 2)]
        );
    }

    #[test]
    fn test_replay_offer_before_answer_exactly_once() {
        let mut session = session();
        session.relay_to_viewer(offer("screen", "o1")).unwrap();
        session.relay_to_viewer(answer("screen", "a1")).unwrap();

        let (conn, mut rx) = connect();
        session.attach_viewer_connection(conn);

        assert_eq!(
            received(&mut rx),
            vec![offer("screen", "o1"), answer("screen", "a1")]
        );
    }

    #[test]
    fn test_reconnect_replays_cached_state_without_candidates() {
        let mut session = session();
        session.relay_to_viewer(offer("screen", "o1")).unwrap();
        session.relay_to_viewer(candidate("screen", 7)).unwrap();

        let (first, mut first_rx) = connect();
        session.attach_viewer_connection(first);
        assert_eq!(
            received(&mut first_rx),
            vec![offer("screen", "o1"), candidate("screen", 7)]
        );

        session.remove_viewer();

        let (second, mut second_rx) = connect();
        session.attach_viewer_connection(second);
        assert_eq!(received(&mut second_rx), vec![offer("screen", "o1")]);
    }

    #[test]
    fn test_replay_sends_all_offers_before_answers() {
        let mut session = session();
        let (viewer, mut viewer_rx) = connect();
        session.attach_viewer_connection(viewer);

        session.relay_to_viewer(answer("camera", "a-cam")).unwrap();
        session.relay_to_viewer(offer("screen", "o-screen")).unwrap();
        session.relay_to_viewer(offer("camera", "o-cam")).unwrap();
        received(&mut viewer_rx);

        session.remove_viewer();
        let (again, mut again_rx) = connect();
        let outcome = session.attach_viewer_connection(again);

        let replayed = received(&mut again_rx);
        assert_eq!(outcome.replayed, 3);
        assert_eq!(replayed.len(), 3);
        assert!(replayed[..2].iter().all(|e| e.kind == EnvelopeKind::Offer));
        assert_eq!(replayed[2], answer("camera", "a-cam"));
    }

    #[test]
    fn test_offer_cache_overwrites_per_track_type() {
        let mut session = session();
        session.relay_to_presenter(offer("camera", "old")).unwrap();
        session.relay_to_presenter(offer("camera", "new")).unwrap();

        assert_eq!(
            session.cached(Role::Viewer, EnvelopeKind::Offer, "camera"),
            Some(&offer("camera", "new"))
        );

        // Presenter gets both queued offers, and no extra replay
        let (conn, mut rx) = connect();
        session.attach_presenter_connection(conn);
        assert_eq!(
            received(&mut rx),
            vec![offer("camera", "old"), offer("camera", "new")]
        );
    }

    #[test]
    fn test_presenter_attach_replays_viewer_caches() {
        let mut session = session();
        let (viewer, _viewer_rx) = connect();
        session.attach_viewer_connection(viewer);
        let (presenter, mut presenter_rx) = connect();
        session.attach_presenter_connection(presenter);

        session.relay_to_presenter(answer("screen", "va")).unwrap();
        received(&mut presenter_rx);

        let presenter_id = session
            .slot(Role::Presenter)
            .connection()
            .unwrap()
            .id()
            .to_string();
        assert!(session.detach_presenter_connection(&presenter_id));

        let (again, mut again_rx) = connect();
        session.attach_presenter_connection(again);
        assert_eq!(received(&mut again_rx), vec![answer("screen", "va")]);
    }

    #[test]
    fn test_candidates_are_never_cached() {
        let mut session = session();
        session.relay_to_viewer(candidate("camera", 1)).unwrap();
        assert!(session
            .cached(Role::Presenter, EnvelopeKind::Candidate, "camera")
            .is_none());
    }

    #[test]
    fn test_remove_viewer_is_idempotent() {
        let mut session = session();
        session.set_viewer_identity("v1");
        let (conn, _rx) = connect();
        session.attach_viewer_connection(conn);

        session.remove_viewer();
        assert_eq!(session.slot(Role::Viewer).identity(), None);
        assert!(!session.is_connected(Role::Viewer));

        session.remove_viewer();
        assert_eq!(session.slot(Role::Viewer).identity(), None);
        assert!(!session.is_connected(Role::Viewer));
    }

    #[test]
    fn test_viewer_identity_claimed_before_connection() {
        let mut session = session();
        session.set_viewer_identity("v1");

        assert_eq!(session.role_of("v1"), Some(Role::Viewer));
        assert_eq!(session.role_of("p1"), Some(Role::Presenter));
        assert_eq!(session.role_of("nobody"), None);
        assert!(!session.is_connected(Role::Viewer));
    }

    #[test]
    fn test_failed_send_keeps_cache_update() {
        let mut session = session();
        let (conn, rx) = connect();
        session.attach_viewer_connection(conn);
        drop(rx);

        let result = session.relay_to_viewer(offer("screen", "o1"));

        assert_eq!(result, Err(DeliveryError::ConnectionClosed));
        assert_eq!(
            session.cached(Role::Presenter, EnvelopeKind::Offer, "screen"),
            Some(&offer("screen", "o1"))
        );
        assert_eq!(session.pending_len(Role::Viewer), 0);
    }

    #[test]
    fn test_pending_queue_drops_oldest_beyond_limit() {
        let limits = SessionLimits {
            max_pending_messages: 2,
            ..SessionLimits::default()
        };
        let mut session = Session::new("abc123", "p1", limits);
        for n in 0..3 {
            session.relay_to_viewer(candidate("camera", n)).unwrap();
        }
        assert_eq!(session.pending_len(Role::Viewer), 2);

        let (conn, mut rx) = connect();
        session.attach_viewer_connection(conn);
        assert_eq!(
            received(&mut rx),
            vec![candidate("camera", 1), candidate("camera", 2)]
        );
    }

    #[test]
    fn test_track_cache_limit_relays_without_caching() {
        let limits = SessionLimits {
            max_cached_tracks: 1,
            ..SessionLimits::default()
        };
        let mut session = Session::new("abc123", "p1", limits);
        session.relay_to_viewer(offer("camera", "o1")).unwrap();
        session.relay_to_viewer(offer("screen", "o2")).unwrap();

        assert!(session.cached(Role::Presenter, EnvelopeKind::Offer, "camera").is_some());
        assert!(session.cached(Role::Presenter, EnvelopeKind::Offer, "screen").is_none());
        assert_eq!(session.pending_len(Role::Viewer), 2);
    }

    #[test]
    fn test_detach_presenter_ignores_stale_connection() {
        let mut session = session();
        let (conn, _rx) = connect();
        session.attach_presenter_connection(conn);

        assert!(!session.detach_presenter_connection("some-older-connection"));
        assert!(session.is_connected(Role::Presenter));
    }

    #[test]
    fn test_close_connections_sends_close_and_clears_slots() {
        let mut session = session();
        let (presenter, mut presenter_rx) = connect();
        let (viewer, mut viewer_rx) = connect();
        session.attach_presenter_connection(presenter);
        session.attach_viewer_connection(viewer);

        session.close_connections("room expired");

        let expected = OutboundFrame::Close {
            reason: "room expired".to_string(),
        };
        assert_eq!(presenter_rx.try_recv().unwrap(), expected);
        assert_eq!(viewer_rx.try_recv().unwrap(), expected);
        assert!(!session.is_connected(Role::Presenter));
        assert!(!session.is_connected(Role::Viewer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutations_refresh_last_active() {
        let mut session = session();
        let created = session.last_active_at();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(session.idle_for(Instant::now()), Duration::from_secs(60));

        session.relay_to_viewer(candidate("camera", 1)).unwrap();
        assert!(session.last_active_at() > created);
        assert_eq!(session.idle_for(Instant::now()), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(5)).await;
        session.set_viewer_identity("v1");
        assert_eq!(session.idle_for(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn test_reattach_closes_displaced_connection() {
        let mut session = session();
        let (old, mut old_rx) = connect();
        let (new, mut new_rx) = connect();

        session.attach_viewer_connection(old);
        session.attach_viewer_connection(new.clone());

        assert_eq!(
            old_rx.try_recv().unwrap(),
            OutboundFrame::Close {
                reason: CLOSE_REASON_REPLACED.to_string()
            }
        );
        assert!(new_rx.try_recv().is_err());
        assert_eq!(
            session.slot(Role::Viewer).connection().map(PeerConnection::id),
            Some(new.id())
        );
    }

    #[test]
    fn test_detach_viewer_ignores_stale_connection() {
        let mut session = session();
        session.set_viewer_identity("v1");
        let (old, _old_rx) = connect();
        let (new, _new_rx) = connect();
        let old_id = old.id().to_string();

        session.attach_viewer_connection(old);
        session.attach_viewer_connection(new.clone());

        assert!(!session.detach_viewer_connection(&old_id));
        assert!(session.is_connected(Role::Viewer));
        assert_eq!(session.role_of("v1"), Some(Role::Viewer));

        assert!(session.detach_viewer_connection(new.id()));
        assert!(!session.is_connected(Role::Viewer));
        assert_eq!(session.role_of("v1"), None);
    }
}
