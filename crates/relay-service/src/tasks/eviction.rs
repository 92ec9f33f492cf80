//! Idle-room eviction background task.
//!
//! Periodically removes every room whose last activity is older than the
//! configured idle limit. Connections still attached to an evicted room are
//! told to close with reason "room expired".
//!
//! # Graceful Shutdown
//!
//! The task exits when its cancellation token is cancelled. A sweep already in
//! progress completes first.

use crate::rooms::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default sweep interval (5 minutes).
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default idle limit before a room is removed (12 hours).
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(12 * 60 * 60);

/// Configuration for the eviction task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Rooms idle strictly longer than this are removed.
    pub max_idle: Duration,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_EVICTION_INTERVAL,
            max_idle: DEFAULT_MAX_IDLE,
        }
    }
}

/// Start the eviction loop. Returns when `cancel_token` is cancelled.
///
/// The first sweep runs one full interval after start.
#[instrument(skip_all, name = "relay.task.eviction")]
pub async fn start_eviction_sweep(
    registry: Arc<SessionRegistry>,
    config: EvictionConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "relay.task.eviction",
        interval_seconds = config.interval.as_secs(),
        max_idle_seconds = config.max_idle.as_secs(),
        "Starting eviction task"
    );

    let start = tokio::time::Instant::now() + config.interval;
    let mut interval = tokio::time::interval_at(start, config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_sweep(&registry, &config).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "relay.task.eviction",
                    "Eviction task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "relay.task.eviction", "Eviction task stopped");
}

/// Run a single sweep and return the evicted room codes.
pub(crate) async fn run_sweep(registry: &SessionRegistry, config: &EvictionConfig) -> Vec<String> {
    let evicted = registry.evict_idle(config.max_idle).await;

    if evicted.is_empty() {
        debug!(target: "relay.task.eviction", "No idle rooms");
    } else {
        let remaining = registry.room_count().await;
        info!(
            target: "relay.task.eviction",
            evicted = evicted.len(),
            remaining,
            "Evicted idle rooms"
        );
    }

    evicted
}
