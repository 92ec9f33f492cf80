//! Wire-level signaling messages.
//!
//! ```text
//! Subscribe:    {"roomCode": "a1b2c3", "role": "presenter" | "viewer"}
//! TrackMessage: {"type": "offer" | "answer" | "candidate", "payload": <any>, "trackType": "..."}
//! Error:        {"error": {"code": 4, "message": "Room not found", "fields": {...}}}
//! ```

use crate::errors::RelayError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The two fixed roles in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Presenter,
    Viewer,
}

impl Role {
    /// Returns the role as it appears on the wire and in metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Presenter => "presenter",
            Role::Viewer => "viewer",
        }
    }

    /// Returns the opposite role.
    #[must_use]
    pub const fn peer(&self) -> Role {
        match self {
            Role::Presenter => Role::Viewer,
            Role::Viewer => Role::Presenter,
        }
    }

    fn parse(value: &str) -> Option<Role> {
        match value {
            "presenter" => Some(Role::Presenter),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of negotiation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Offer,
    Answer,
    Candidate,
}

impl EnvelopeKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Offer => "offer",
            EnvelopeKind::Answer => "answer",
            EnvelopeKind::Candidate => "candidate",
        }
    }
}

/// A negotiation message tagged with its media track (`TrackMessage` on the wire).
///
/// The payload is opaque to the relay (an SDP blob or an ICE candidate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub track_type: String,
}

impl Envelope {
    #[must_use]
    pub fn new(
        kind: EnvelopeKind,
        track_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            payload,
            track_type: track_type.into(),
        }
    }

    /// Decode a track message from a text frame.
    pub fn from_json(text: &str) -> Result<Self, RelayError> {
        serde_json::from_str(text).map_err(|e| RelayError::malformed(e.to_string()))
    }
}

/// First message on every signaling connection, before validation.
///
/// Fields default to empty so that missing fields surface as field-level
/// validation errors rather than a decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeMessage {
    #[serde(default)]
    pub room_code: String,
    #[serde(default)]
    pub role: String,
}

/// A validated subscribe message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub room_code: String,
    pub role: Role,
}

impl SubscribeMessage {
    /// Decode and validate a subscribe message from a text frame.
    pub fn parse(text: &str) -> Result<Subscription, RelayError> {
        let message: SubscribeMessage =
            serde_json::from_str(text).map_err(|e| RelayError::malformed(e.to_string()))?;
        message.validate()
    }

    /// Check `roomCode` is non-empty and `role` is one of the fixed roles.
    pub fn validate(self) -> Result<Subscription, RelayError> {
        let mut fields = BTreeMap::new();

        if self.room_code.trim().is_empty() {
            fields.insert("roomCode".to_string(), "must be provided".to_string());
        }

        let role = Role::parse(&self.role);
        if role.is_none() {
            fields.insert(
                "role".to_string(),
                "must be one of: presenter, viewer".to_string(),
            );
        }

        match role {
            Some(role) if fields.is_empty() => Ok(Subscription {
                room_code: self.room_code,
                role,
            }),
            _ => Err(RelayError::validation(fields)),
        }
    }
}

/// Error frame sent to a signaling client before its connection is closed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorFrame {
    pub error: ErrorFrameDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorFrameDetail {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

impl From<&RelayError> for ErrorFrame {
    fn from(err: &RelayError) -> Self {
        Self {
            error: ErrorFrameDetail {
                code: err.error_code(),
                message: err.client_message(),
                fields: err.fields().cloned(),
            },
        }
    }
}
