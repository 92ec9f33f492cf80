//! Signaling endpoint.
//!
//! Bridges one ordered, message-oriented connection to the session registry.
//! The transport supplies inbound text frames as a stream and an outbound
//! [`PeerConnection`]; everything after that is protocol:
//!
//! 1. The first frame must be a valid subscribe message. Anything else gets a
//!    validation error frame and the connection is closed.
//! 2. The connection joins its slot. An unknown room gets a not-found error
//!    frame and the connection is closed.
//! 3. Each following frame is decoded as a track message and relayed to the
//!    other peer in read order. A read failure, a malformed track message or
//!    the end of the stream ends the loop.
//! 4. On exit the slot is released, but only if it still holds this
//!    connection: the viewer slot is cleared entirely, the presenter keeps its
//!    identity but loses its connection. A connection displaced by a newer one
//!    was already sent a `replaced` close frame and releases nothing.

use crate::errors::RelayError;
use crate::observability::metrics;
use crate::rooms::{Envelope, PeerConnection, Role, SessionRegistry, SubscribeMessage, Subscription};

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Close reason sent when a connection's read loop ends normally.
const CLOSE_REASON_DONE: &str = "connection closed";

/// Serves signaling connections against a shared registry.
#[derive(Clone)]
pub struct SignalingEndpoint {
    registry: Arc<SessionRegistry>,
}

impl SignalingEndpoint {
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Serve one connection until it ends.
    ///
    /// `user_id` has already been verified by the caller. `incoming` yields
    /// inbound text frames in order; `connection` carries frames back out.
    #[instrument(
        skip_all,
        name = "relay.endpoint.serve",
        fields(connection_id = %connection.id())
    )]
    pub async fn serve<S>(&self, user_id: &str, mut incoming: S, connection: PeerConnection)
    where
        S: Stream<Item = Result<String, RelayError>> + Unpin,
    {
        let subscription = match incoming.next().await {
            Some(Ok(text)) => match SubscribeMessage::parse(&text) {
                Ok(subscription) => subscription,
                Err(e) => {
                    warn!(
                        target: "relay.endpoint",
                        error = %e,
                        "Rejected subscribe message"
                    );
                    reject(&connection, &e);
                    return;
                }
            },
            Some(Err(e)) => {
                debug!(
                    target: "relay.endpoint",
                    error = %e,
                    "Read failed before subscribe"
                );
                return;
            }
            None => {
                debug!(target: "relay.endpoint", "Connection ended before subscribe");
                return;
            }
        };

        debug!(
            target: "relay.endpoint",
            user_id = %user_id,
            room_code = %subscription.room_code,
            role = %subscription.role,
            "Subscribe accepted"
        );

        match subscription.role {
            Role::Presenter => {
                self.serve_presenter(&subscription, &mut incoming, &connection).await;
            }
            Role::Viewer => {
                self.serve_viewer(&subscription, &mut incoming, &connection).await;
            }
        }
    }

    async fn serve_presenter<S>(
        &self,
        subscription: &Subscription,
        incoming: &mut S,
        connection: &PeerConnection,
    ) where
        S: Stream<Item = Result<String, RelayError>> + Unpin,
    {
        let code = subscription.room_code.as_str();

        if !self.registry.join_presenter(code, connection.clone()).await {
            reject(connection, &RelayError::RoomNotFound(code.to_string()));
            return;
        }

        metrics::record_connection_opened(Role::Presenter);
        self.relay_loop(code, Role::Viewer, incoming).await;
        metrics::record_connection_closed(Role::Presenter);

        self.registry.leave_presenter(code, connection.id()).await;
        finish(connection);
    }

    async fn serve_viewer<S>(
        &self,
        subscription: &Subscription,
        incoming: &mut S,
        connection: &PeerConnection,
    ) where
        S: Stream<Item = Result<String, RelayError>> + Unpin,
    {
        let code = subscription.room_code.as_str();

        if !self.registry.join_viewer_connection(code, connection.clone()).await {
            reject(connection, &RelayError::RoomNotFound(code.to_string()));
            return;
        }

        metrics::record_connection_opened(Role::Viewer);
        self.relay_loop(code, Role::Presenter, incoming).await;
        metrics::record_connection_closed(Role::Viewer);

        self.registry.leave_viewer_connection(code, connection.id()).await;
        finish(connection);
    }

    /// Read track messages and relay each to `destination` until the stream
    /// ends, fails, or the room disappears.
    async fn relay_loop<S>(&self, code: &str, destination: Role, incoming: &mut S)
    where
        S: Stream<Item = Result<String, RelayError>> + Unpin,
    {
        while let Some(frame) = incoming.next().await {
            let envelope = match frame.and_then(|text| Envelope::from_json(&text)) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(
                        target: "relay.endpoint",
                        room_code = %code,
                        source = %destination.peer(),
                        error = %e,
                        "Read failed, ending connection"
                    );
                    return;
                }
            };

            let result = match destination {
                Role::Viewer => self.registry.send_to_viewer(code, envelope).await,
                Role::Presenter => self.registry.send_to_presenter(code, envelope).await,
            };

            // Delivery failures are logged by the registry and not fatal here.
            if let Err(RelayError::RoomNotFound(_)) = result {
                info!(
                    target: "relay.endpoint",
                    room_code = %code,
                    "Room no longer exists, ending connection"
                );
                return;
            }
        }

        debug!(
            target: "relay.endpoint",
            room_code = %code,
            source = %destination.peer(),
            "Connection ended"
        );
    }
}

/// Send an error frame and close.
fn reject(connection: &PeerConnection, err: &RelayError) {
    if let Err(e) = connection.send_error(err) {
        debug!(target: "relay.endpoint", error = %e, "Could not send error frame");
    }
    if let Err(e) = connection.close(err.client_message()) {
        debug!(target: "relay.endpoint", error = %e, "Could not close connection");
    }
}

fn finish(connection: &PeerConnection) {
    if let Err(e) = connection.close(CLOSE_REASON_DONE) {
        debug!(target: "relay.endpoint", error = %e, "Connection already gone");
    }
}
