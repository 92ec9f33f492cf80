//! WebSocket adapter for the signaling endpoint.
//!
//! The socket is split: a writer task drains the connection's outbound channel
//! into the sink while the request task feeds inbound frames to
//! [`SignalingEndpoint::serve`]. Text frames carry messages; binary frames are
//! accepted if they are valid UTF-8. A close frame ends the inbound stream.

use super::endpoint::SignalingEndpoint;
use crate::errors::RelayError;
use crate::middleware::AuthenticatedUser;
use crate::rooms::{OutboundFrame, PeerConnection};
use crate::routes::AppState;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::Extension;
use futures::stream::SplitSink;
use futures::{future, SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long the writer gets to flush after the read side finishes.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// `GET /signaling` handler: upgrade and serve one signaling connection.
pub async fn signaling_upgrade(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    ws: WebSocketUpgrade,
) -> Response {
    let endpoint = state.endpoint.clone();
    let buffer = state.config.connection_buffer;

    ws.on_upgrade(move |socket| handle_socket(socket, endpoint, user_id, buffer))
}

async fn handle_socket(
    socket: WebSocket,
    endpoint: SignalingEndpoint,
    user_id: String,
    buffer: usize,
) {
    let (sink, stream) = socket.split();
    let (connection, outbound) = PeerConnection::channel(buffer);
    let connection_id = connection.id().to_string();

    info!(
        target: "relay.ws",
        connection_id = %connection_id,
        "Signaling connection opened"
    );

    let mut writer = tokio::spawn(write_frames(sink, outbound, connection_id.clone()));

    let incoming = Box::pin(
        stream
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| future::ready(inbound_text(msg))),
    );

    endpoint.serve(&user_id, incoming, connection).await;

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        debug!(
            target: "relay.ws",
            connection_id = %connection_id,
            "Writer did not finish in time, aborting"
        );
        writer.abort();
    }

    info!(
        target: "relay.ws",
        connection_id = %connection_id,
        "Signaling connection closed"
    );
}

/// Map an inbound WebSocket message to message text, skipping control frames.
fn inbound_text(msg: Result<Message, axum::Error>) -> Option<Result<String, RelayError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(text)),
        Ok(Message::Binary(data)) => Some(
            String::from_utf8(data)
                .map_err(|_| RelayError::malformed("binary frame is not valid UTF-8")),
        ),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_)) => None,
        Err(e) => Some(Err(RelayError::Transport(e.to_string()))),
    }
}

/// Drain outbound frames into the socket until closed.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    connection_id: String,
) {
    while let Some(frame) = outbound.recv().await {
        let message = match frame {
            OutboundFrame::Close { reason } => {
                let close = Message::Close(Some(CloseFrame {
                    code: close_code::NORMAL,
                    reason: reason.into(),
                }));
                if let Err(e) = sink.send(close).await {
                    debug!(
                        target: "relay.ws",
                        connection_id = %connection_id,
                        error = %e,
                        "Close frame not sent"
                    );
                }
                break;
            }
            data => match data.to_json() {
                Ok(Some(text)) => Message::Text(text),
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        target: "relay.ws",
                        connection_id = %connection_id,
                        error = %e,
                        "Failed to serialize outbound frame"
                    );
                    continue;
                }
            },
        };

        if let Err(e) = sink.send(message).await {
            debug!(
                target: "relay.ws",
                connection_id = %connection_id,
                error = %e,
                "Socket write failed, stopping writer"
            );
            break;
        }
    }
}
