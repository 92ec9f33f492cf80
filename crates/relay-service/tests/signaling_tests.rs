//! Signaling flow integration tests.
//!
//! Drive `SignalingEndpoint` with in-memory peers and check what each side
//! receives across connects, disconnects and reconnects.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use relay_service::rooms::{OutboundFrame, Role, SessionLimits, SessionRegistry};
use relay_service::signaling::SignalingEndpoint;
use relay_service::tasks::{start_eviction_sweep, EvictionConfig};
use relay_test_utils::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Harness {
    registry: Arc<SessionRegistry>,
    endpoint: SignalingEndpoint,
    code: String,
}

impl Harness {
    async fn new() -> Self {
        let registry = Arc::new(SessionRegistry::new(SessionLimits::default()));
        let code = registry.create_room("p1").await.unwrap();
        registry.join_viewer_identity(&code, "v1").await;
        Self {
            endpoint: SignalingEndpoint::new(Arc::clone(&registry)),
            registry,
            code,
        }
    }

    async fn connect(&self, user_id: &str, role: &str) -> (MockPeer, tokio::task::JoinHandle<()>) {
        let mut peer = MockPeer::new();
        let task = peer.serve(&self.endpoint, user_id);
        peer.send_text(subscribe(&self.code, role)).await;
        settle().await;
        (peer, task)
    }

    async fn connected(&self, role: Role) -> bool {
        self.registry
            .with_session(&self.code, |s| s.is_connected(role))
            .await
            .unwrap_or(false)
    }
}

#[tokio::test]
async fn test_live_relay_in_both_directions() {
    let harness = Harness::new().await;
    let (mut presenter, _p_task) = harness.connect("p1", "presenter").await;
    let (mut viewer, _v_task) = harness.connect("v1", "viewer").await;

    presenter.send_envelope(&offer("screen")).await;
    presenter.send_envelope(&candidate("screen", 1)).await;
    settle().await;
    assert_eq!(viewer.envelopes(), vec![offer("screen"), candidate("screen", 1)]);

    viewer.send_envelope(&answer("screen")).await;
    settle().await;
    assert_eq!(presenter.envelopes(), vec![answer("screen")]);
}

#[tokio::test]
async fn test_late_viewer_gets_offer_then_answer_exactly_once() {
    let harness = Harness::new().await;
    let (presenter, _p_task) = harness.connect("p1", "presenter").await;

    presenter.send_envelope(&offer("screen")).await;
    presenter.send_envelope(&answer("screen")).await;
    settle().await;

    let (mut viewer, _v_task) = harness.connect("v1", "viewer").await;

    assert_eq!(viewer.envelopes(), vec![offer("screen"), answer("screen")]);
    assert_eq!(
        harness
            .registry
            .with_session(&harness.code, |s| s.pending_len(Role::Viewer))
            .await,
        Some(0)
    );
}

#[tokio::test]
async fn test_candidates_are_not_replayed_on_second_reconnect() {
    let harness = Harness::new().await;
    let (presenter, _p_task) = harness.connect("p1", "presenter").await;

    presenter.send_envelope(&candidate("camera", 7)).await;
    settle().await;

    let (mut first, first_task) = harness.connect("v1", "viewer").await;
    assert_eq!(first.envelopes(), vec![candidate("camera", 7)]);

    first.hang_up();
    first_task.await.unwrap();
    assert!(!harness.connected(Role::Viewer).await);

    let (mut second, _second_task) = harness.connect("v1", "viewer").await;
    assert!(second.envelopes().is_empty());
}

#[tokio::test]
async fn test_viewer_reconnect_replays_cached_offer() {
    let harness = Harness::new().await;
    let (presenter, _p_task) = harness.connect("p1", "presenter").await;
    let (mut first, first_task) = harness.connect("v1", "viewer").await;

    presenter.send_envelope(&offer("screen")).await;
    settle().await;
    assert_eq!(first.envelopes(), vec![offer("screen")]);

    first.fail_read("connection reset").await;
    first_task.await.unwrap();

    let (mut second, _second_task) = harness.connect("v1", "viewer").await;
    assert_eq!(second.envelopes(), vec![offer("screen")]);
}

#[tokio::test]
async fn test_viewer_exit_clears_identity() {
    let harness = Harness::new().await;
    let (mut viewer, task) = harness.connect("v1", "viewer").await;
    assert!(harness.connected(Role::Viewer).await);

    viewer.hang_up();
    task.await.unwrap();

    assert_eq!(harness.registry.find_room_for_user("v1").await, None);
    assert!(matches!(
        viewer.drain().last(),
        Some(OutboundFrame::Close { .. })
    ));
}

#[tokio::test]
async fn test_viewer_reconnect_survives_old_connection_exit() {
    let harness = Harness::new().await;
    let (presenter, _p_task) = harness.connect("p1", "presenter").await;
    let (mut old, old_task) = harness.connect("v1", "viewer").await;
    let (mut new, _new_task) = harness.connect("v1", "viewer").await;

    assert_eq!(
        old.drain(),
        vec![OutboundFrame::Close {
            reason: "replaced".to_string()
        }]
    );

    // The old transport reacts to the close frame by ending its stream.
    old.hang_up();
    old_task.await.unwrap();

    assert!(harness.connected(Role::Viewer).await);
    assert_eq!(
        harness.registry.find_room_for_user("v1").await.map(|m| m.role),
        Some(Role::Viewer)
    );

    presenter.send_envelope(&offer("screen")).await;
    settle().await;
    assert_eq!(new.envelopes(), vec![offer("screen")]);
    assert!(old.envelopes().is_empty());
}

#[tokio::test]
async fn test_presenter_reconnect_receives_buffered_viewer_messages() {
    let harness = Harness::new().await;
    let (mut viewer, _v_task) = harness.connect("v1", "viewer").await;
    let (mut first, first_task) = harness.connect("p1", "presenter").await;

    first.hang_up();
    first_task.await.unwrap();
    assert!(!harness.connected(Role::Presenter).await);

    viewer.send_envelope(&answer("screen")).await;
    viewer.send_envelope(&candidate("screen", 2)).await;
    settle().await;

    let (mut second, _second_task) = harness.connect("p1", "presenter").await;
    assert_eq!(
        second.envelopes(),
        vec![answer("screen"), candidate("screen", 2)]
    );
    assert!(viewer.envelopes().is_empty());
}

#[tokio::test]
async fn test_removed_room_closes_both_peers() {
    let harness = Harness::new().await;
    let (mut presenter, p_task) = harness.connect("p1", "presenter").await;
    let (mut viewer, v_task) = harness.connect("v1", "viewer").await;

    assert!(harness.registry.remove_room(&harness.code).await);

    for peer in [&mut presenter, &mut viewer] {
        assert_eq!(
            peer.drain(),
            vec![OutboundFrame::Close {
                reason: "room ended".to_string()
            }]
        );
    }

    // The transport reacts to the close frame by ending the inbound stream.
    presenter.hang_up();
    viewer.hang_up();
    p_task.await.unwrap();
    v_task.await.unwrap();
}

#[tokio::test]
async fn test_subscribe_to_unknown_room_is_rejected() {
    let harness = Harness::new().await;
    let mut peer = MockPeer::new();
    let task = peer.serve(&harness.endpoint, "v1");

    peer.send_text(subscribe("zzzzzz", "viewer")).await;
    task.await.unwrap();

    let frames = peer.drain();
    match frames.first() {
        Some(OutboundFrame::Error(frame)) => assert_eq!(frame.error.code, 4),
        other => panic!("expected not-found error frame, got {other:?}"),
    }
    assert!(matches!(frames.get(1), Some(OutboundFrame::Close { .. })));
}

#[tokio::test]
async fn test_malformed_subscribe_is_rejected_without_state_change() {
    let harness = Harness::new().await;
    let mut peer = MockPeer::new();
    let task = peer.serve(&harness.endpoint, "v1");

    peer.send_text("not json").await;
    task.await.unwrap();

    match peer.drain().first() {
        Some(OutboundFrame::Error(frame)) => {
            assert_eq!(frame.error.code, 1);
            assert!(frame.error.fields.is_some());
        }
        other => panic!("expected validation error frame, got {other:?}"),
    }
    assert!(!harness.connected(Role::Viewer).await);
    assert!(!harness.connected(Role::Presenter).await);
}

#[tokio::test(start_paused = true)]
async fn test_idle_room_is_evicted_with_open_connection() {
    let harness = Harness::new().await;
    let (mut viewer, v_task) = harness.connect("v1", "viewer").await;
    let cancel_token = CancellationToken::new();

    let sweep = tokio::spawn(start_eviction_sweep(
        Arc::clone(&harness.registry),
        EvictionConfig {
            interval: Duration::from_secs(60),
            max_idle: Duration::from_secs(600),
        },
        cancel_token.clone(),
    ));

    tokio::time::sleep(Duration::from_secs(661)).await;
    settle().await;

    assert!(!harness.registry.room_exists(&harness.code).await);
    assert_eq!(
        viewer.drain(),
        vec![OutboundFrame::Close {
            reason: "room expired".to_string()
        }]
    );

    viewer.hang_up();
    v_task.await.unwrap();
    cancel_token.cancel();
    sweep.await.unwrap();
}
