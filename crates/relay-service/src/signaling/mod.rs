//! Signaling connections.
//!
//! - `endpoint` - Transport-agnostic protocol: subscribe, then relay until the
//!   connection ends
//! - `websocket` - axum WebSocket adapter feeding the endpoint

pub mod endpoint;
pub mod websocket;

pub use endpoint::SignalingEndpoint;
pub use websocket::signaling_upgrade;
