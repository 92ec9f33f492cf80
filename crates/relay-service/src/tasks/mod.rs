//! Background tasks for the signaling relay.
//!
//! # Tasks
//!
//! - `eviction` - Removes rooms that have been idle past the configured limit

pub mod eviction;

pub use eviction::{start_eviction_sweep, EvictionConfig};
