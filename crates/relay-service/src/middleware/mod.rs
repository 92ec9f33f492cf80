//! Middleware for the signaling relay.
//!
//! # Components
//!
//! - `auth` - Identity middleware for API and signaling routes

pub mod auth;

pub use auth::{require_identity, AuthenticatedUser};
