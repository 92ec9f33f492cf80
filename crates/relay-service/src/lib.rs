//! Watch Party Signaling Relay
//!
//! Pairs one presenter with one viewer per room and relays WebRTC negotiation
//! messages (offers, answers, ICE candidates) between them. Messages for an
//! absent peer are buffered; the latest offer and answer per track type are
//! cached and replayed when a peer reconnects. Idle rooms are evicted by a
//! background sweep.
//!
//! The relay never touches media. It holds negotiation state only, in memory.
//!
//! # Architecture
//!
//! ```text
//! HTTP (axum)                          WebSocket (axum ws)
//!   routes → handlers                    signaling::websocket
//!        │                                      │
//!        │                              signaling::SignalingEndpoint
//!        └──────────────┬───────────────────────┘
//!                       ▼
//!              rooms::SessionRegistry ◄── tasks::eviction
//!                       │
//!               rooms::Session (per room)
//! ```
//!
//! # Modules
//!
//! - [`rooms`] - Sessions, envelopes and the registry
//! - [`signaling`] - Per-connection protocol and the WebSocket adapter
//! - [`tasks`] - Eviction sweep
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-facing codes

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod rooms;
pub mod routes;
pub mod signaling;
pub mod tasks;
