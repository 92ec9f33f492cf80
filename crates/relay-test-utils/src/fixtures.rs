//! Envelope and subscribe-message fixtures.

use relay_service::rooms::{Envelope, EnvelopeKind};
use serde_json::json;

/// Offer for `track` with a fixed SDP body.
#[must_use]
pub fn offer(track: &str) -> Envelope {
    Envelope::new(
        EnvelopeKind::Offer,
        track,
        json!({"type": "offer", "sdp": format!("v=0 offer {track}")}),
    )
}

/// Answer for `track` with a fixed SDP body.
#[must_use]
pub fn answer(track: &str) -> Envelope {
    Envelope::new(
        EnvelopeKind::Answer,
        track,
        json!({"type": "answer", "sdp": format!("v=0 answer {track}")}),
    )
}

/// ICE candidate number `n` for `track`.
#[must_use]
pub fn candidate(track: &str, n: u32) -> Envelope {
    Envelope::new(
        EnvelopeKind::Candidate,
        track,
        json!({
            "candidate": format!("candidate:{n} 1 udp 2122260223 10.0.0.1 {} typ host", 50000 + n),
            "sdpMid": "0",
        }),
    )
}

/// Subscribe message text for `code` and `role`.
#[must_use]
pub fn subscribe(code: &str, role: &str) -> String {
    json!({"roomCode": code, "role": role}).to_string()
}

/// Wire text for `envelope`.
#[must_use]
pub fn envelope_text(envelope: &Envelope) -> String {
    serde_json::to_string(envelope).expect("envelope serializes")
}
