//! Relay error types.
//!
//! Error types map to signaling `ErrorCode` values for WebSocket error frames
//! and to HTTP status codes for the room API. Internal details are logged
//! server-side but not exposed to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Relay error type.
///
/// Maps to signaling `ErrorCode` values:
/// - `Validation`: `INVALID_REQUEST` (1)
/// - `Unauthenticated`: `UNAUTHORIZED` (2)
/// - `RoomNotFound`: `NOT_FOUND` (4)
/// - Delivery, Transport, Internal: `INTERNAL_ERROR` (6)
/// - `CodeSpaceExhausted`: `CAPACITY_EXCEEDED` (7)
#[derive(Debug, Error)]
pub enum RelayError {
    /// A client message was malformed or failed field validation.
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        /// Per-field reasons, keyed by wire field name.
        fields: BTreeMap<String, String>,
    },

    /// Room code does not resolve to an active session.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// A send to a peer connection failed.
    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    /// The underlying connection produced an error while reading.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request did not carry a verified identity.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Could not find an unused room code.
    #[error("Room code space exhausted after {0} attempts")]
    CodeSpaceExhausted(u32),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure to hand a frame to a peer's connection.
///
/// Delivery is best-effort: session state is never rolled back on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The connection's writer has gone away.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection's outbound buffer is full.
    #[error("outbound buffer full")]
    Backpressure,
}

impl DeliveryError {
    /// Returns the reason as a bounded metric label.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            DeliveryError::ConnectionClosed => "closed",
            DeliveryError::Backpressure => "backpressure",
        }
    }
}

impl RelayError {
    /// Build a validation error from a map of field reasons.
    pub fn validation(fields: BTreeMap<String, String>) -> Self {
        RelayError::Validation {
            message: "One or more fields are invalid".to_string(),
            fields,
        }
    }

    /// Build a validation error for a payload that could not be decoded at all.
    pub fn malformed(reason: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("payload".to_string(), reason.into());
        RelayError::Validation {
            message: "Malformed message".to_string(),
            fields,
        }
    }

    /// Returns the signaling `ErrorCode` value for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            RelayError::Validation { .. } => 1, // INVALID_REQUEST
            RelayError::Unauthenticated(_) => 2, // UNAUTHORIZED
            RelayError::RoomNotFound(_) => 4,    // NOT_FOUND
            RelayError::Delivery(_)
            | RelayError::Transport(_)
            | RelayError::Internal(_) => 6, // INTERNAL_ERROR
            RelayError::CodeSpaceExhausted(_) => 7, // CAPACITY_EXCEEDED
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Validation { message, .. } => message.clone(),
            RelayError::Unauthenticated(_) => "Authentication required".to_string(),
            RelayError::RoomNotFound(_) => "Room not found".to_string(),
            RelayError::CodeSpaceExhausted(_) => {
                "No room codes available, please try again".to_string()
            }
            RelayError::Delivery(_)
            | RelayError::Transport(_)
            | RelayError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Returns per-field validation reasons, if any.
    pub fn fields(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            RelayError::Validation { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Validation { .. } => StatusCode::BAD_REQUEST,
            RelayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            RelayError::RoomNotFound(_) => StatusCode::NOT_FOUND,
            RelayError::CodeSpaceExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::Delivery(_)
            | RelayError::Transport(_)
            | RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn http_code(&self) -> &'static str {
        match self {
            RelayError::Validation { .. } => "VALIDATION_FAILED",
            RelayError::Unauthenticated(_) => "UNAUTHENTICATED",
            RelayError::RoomNotFound(_) => "NOT_FOUND",
            RelayError::CodeSpaceExhausted(_) => "CAPACITY_EXCEEDED",
            RelayError::Delivery(_)
            | RelayError::Transport(_)
            | RelayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
struct HttpErrorResponse {
    error: HttpErrorDetail,
}

#[derive(Serialize)]
struct HttpErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<BTreeMap<String, String>>,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Log actual error server-side, return generic message to client
            tracing::error!(target: "relay.api", error = %self, "Request failed");
        }

        let body = HttpErrorResponse {
            error: HttpErrorDetail {
                code: self.http_code(),
                message: self.client_message(),
                fields: self.fields().cloned(),
            },
        };

        (status, Json(body)).into_response()
    }
}
