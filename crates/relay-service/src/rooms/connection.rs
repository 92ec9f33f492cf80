//! Live-connection handle held in a peer slot.
//!
//! A `PeerConnection` is the sending half of a bounded channel drained by the
//! transport's writer task. Sends never block: a full buffer or a departed
//! writer is reported as a [`DeliveryError`] and the frame is dropped.

use super::envelope::{Envelope, ErrorFrame};
use crate::errors::{DeliveryError, RelayError};

use tokio::sync::mpsc;
use uuid::Uuid;

/// Default outbound buffer per connection. Large enough for a full attach
/// under the default session limits.
pub const DEFAULT_CONNECTION_BUFFER: usize = 1024;

/// A frame queued for the transport writer.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// A relayed negotiation message.
    Envelope(Envelope),
    /// An error frame for the client.
    Error(ErrorFrame),
    /// Close the connection with the given reason.
    Close { reason: String },
}

impl OutboundFrame {
    /// Serialize a data frame as JSON text. Close frames have no text form.
    pub fn to_json(&self) -> Result<Option<String>, serde_json::Error> {
        match self {
            OutboundFrame::Envelope(envelope) => serde_json::to_string(envelope).map(Some),
            OutboundFrame::Error(frame) => serde_json::to_string(frame).map(Some),
            OutboundFrame::Close { .. } => Ok(None),
        }
    }
}

/// Handle to one peer's live connection.
#[derive(Debug, Clone)]
pub struct PeerConnection {
    id: String,
    sender: mpsc::Sender<OutboundFrame>,
}

impl PeerConnection {
    /// Create a connection handle and the receiver its writer drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id: Uuid::new_v4().to_string(),
            sender,
        };
        (connection, receiver)
    }

    /// Unique ID of this connection (distinguishes reconnects of the same peer).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a negotiation message.
    pub fn send(&self, envelope: Envelope) -> Result<(), DeliveryError> {
        self.push(OutboundFrame::Envelope(envelope))
    }

    /// Queue an error frame describing `err`.
    pub fn send_error(&self, err: &RelayError) -> Result<(), DeliveryError> {
        self.push(OutboundFrame::Error(ErrorFrame::from(err)))
    }

    /// Ask the writer to close the connection.
    pub fn close(&self, reason: impl Into<String>) -> Result<(), DeliveryError> {
        self.push(OutboundFrame::Close {
            reason: reason.into(),
        })
    }

    /// Total frames the outbound buffer can hold.
    #[must_use]
    pub fn max_capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Whether the writer side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn push(&self, frame: OutboundFrame) -> Result<(), DeliveryError> {
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::ConnectionClosed,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::rooms::envelope::EnvelopeKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_reaches_receiver() {
        let (conn, mut rx) = PeerConnection::channel(4);
        let envelope = Envelope::new(EnvelopeKind::Offer, "camera", json!("sdp"));

        conn.send(envelope.clone()).unwrap();

        assert_eq!(rx.recv().await, Some(OutboundFrame::Envelope(envelope)));
    }

    #[test]
    fn test_full_buffer_reports_backpressure() {
        let (conn, _rx) = PeerConnection::channel(1);
        let envelope = Envelope::new(EnvelopeKind::Candidate, "camera", json!(1));

        conn.send(envelope.clone()).unwrap();
        assert_eq!(conn.send(envelope), Err(DeliveryError::Backpressure));
    }

    #[test]
    fn test_dropped_receiver_reports_closed() {
        let (conn, rx) = PeerConnection::channel(4);
        drop(rx);

        assert!(conn.is_closed());
        assert_eq!(conn.close("bye"), Err(DeliveryError::ConnectionClosed));
    }

    #[test]
    fn test_max_capacity_reports_buffer_size() {
        let (conn, _rx) = PeerConnection::channel(16);
        assert_eq!(conn.max_capacity(), 16);
        let (conn, _rx) = PeerConnection::channel(0);
        assert_eq!(conn.max_capacity(), 1);
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let (a, _rx_a) = PeerConnection::channel(1);
        let (b, _rx_b) = PeerConnection::channel(1);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_close_frame_has_no_text() {
        let frame = OutboundFrame::Close {
            reason: "room ended".to_string(),
        };
        assert_eq!(frame.to_json().unwrap(), None);
    }
}
