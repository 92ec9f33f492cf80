//! In-memory signaling client.
//!
//! A `MockPeer` stands in for a browser on the far side of a WebSocket: tests
//! push inbound text frames into it and read back what the relay sent.

use relay_service::errors::RelayError;
use relay_service::rooms::{Envelope, OutboundFrame, PeerConnection};
use relay_service::signaling::SignalingEndpoint;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::fixtures::envelope_text;

/// Default buffer for both directions.
const MOCK_BUFFER: usize = 64;

type Inbound = Result<String, RelayError>;

/// Mock signaling client.
pub struct MockPeer {
    connection: PeerConnection,
    outbound: mpsc::Receiver<OutboundFrame>,
    inbound_tx: Option<mpsc::Sender<Inbound>>,
    inbound_rx: Option<mpsc::Receiver<Inbound>>,
}

impl Default for MockPeer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPeer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer(MOCK_BUFFER)
    }

    /// Create a peer whose outbound channel holds `buffer` frames.
    #[must_use]
    pub fn with_buffer(buffer: usize) -> Self {
        let (connection, outbound) = PeerConnection::channel(buffer);
        let (inbound_tx, inbound_rx) = mpsc::channel(MOCK_BUFFER);
        Self {
            connection,
            outbound,
            inbound_tx: Some(inbound_tx),
            inbound_rx: Some(inbound_rx),
        }
    }

    /// Handle the relay writes to.
    #[must_use]
    pub fn connection(&self) -> PeerConnection {
        self.connection.clone()
    }

    /// Spawn `endpoint.serve` for this peer.
    ///
    /// # Panics
    ///
    /// Panics if called twice on the same peer.
    pub fn serve(&mut self, endpoint: &SignalingEndpoint, user_id: &str) -> JoinHandle<()> {
        let inbound = ReceiverStream::new(
            self.inbound_rx
                .take()
                .expect("MockPeer::serve called twice"),
        );
        let endpoint = endpoint.clone();
        let user_id = user_id.to_string();
        let connection = self.connection.clone();
        tokio::spawn(async move { endpoint.serve(&user_id, inbound, connection).await })
    }

    /// Push an inbound text frame.
    pub async fn send_text(&self, text: impl Into<String>) {
        self.push(Ok(text.into())).await;
    }

    /// Push an inbound envelope.
    pub async fn send_envelope(&self, envelope: &Envelope) {
        self.send_text(envelope_text(envelope)).await;
    }

    /// Push a read failure.
    pub async fn fail_read(&self, message: &str) {
        self.push(Err(RelayError::Transport(message.to_string())))
            .await;
    }

    /// End the inbound stream, as a client closing its socket.
    pub fn hang_up(&mut self) {
        self.inbound_tx = None;
    }

    /// All frames sent so far.
    pub fn drain(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Envelopes sent so far, ignoring error and close frames.
    pub fn envelopes(&mut self) -> Vec<Envelope> {
        self.drain()
            .into_iter()
            .filter_map(|frame| match frame {
                OutboundFrame::Envelope(envelope) => Some(envelope),
                _ => None,
            })
            .collect()
    }

    /// A send after the endpoint stopped reading is dropped silently.
    async fn push(&self, item: Inbound) {
        let tx = self.inbound_tx.as_ref().expect("MockPeer already hung up");
        let _ = tx.send(item).await;
    }
}
