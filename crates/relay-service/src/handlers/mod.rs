//! HTTP request handlers for the signaling relay.

pub mod rooms;

pub use rooms::{claim_viewer, create_room, current_room, end_room};
