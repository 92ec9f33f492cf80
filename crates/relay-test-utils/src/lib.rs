//! # Relay Test Utilities
//!
//! Shared test utilities for the signaling relay.
//!
//! - `mock_peer` - In-memory signaling client driving a `SignalingEndpoint`
//! - `fixtures` - Envelopes and subscribe messages
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_test_utils::*;
//!
//! let mut viewer = MockPeer::new();
//! let task = viewer.serve(&endpoint, "v1");
//! viewer.send_text(subscribe(&code, "viewer")).await;
//! settle().await;
//! assert_eq!(viewer.envelopes(), vec![offer("screen")]);
//! ```

pub mod fixtures;
pub mod mock_peer;

pub use fixtures::*;
pub use mock_peer::*;

/// Let spawned tasks run until they block.
///
/// Intended for current-thread test runtimes, where every ready task gets
/// polled before control returns.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
