//! Integration tests for the peer-link negotiation and reconnection machinery.
//!
//! The tests play the remote controller: they publish the offer through the
//! in-memory relay, observe the answer, trickle ICE candidates, open the
//! in-memory data channel, and cut it to exercise reconnection. The link
//! under test runs the exact code path production uses — only the relay and
//! the peer transport are in-memory.

use std::sync::Arc;
use std::time::Duration;

use padlink_core::{ConnectionState, ControlEnvelope, IceCandidate, LinkId, SignalMessage};
use padlink_host::infrastructure::peer::link::PeerLink;
use padlink_host::infrastructure::peer::mock::{
    MemoryChannelDriver, MockConnector, MockControl, MockEndpointHandle,
};
use padlink_host::infrastructure::peer::{BoundedRetries, ChannelMessage, ReconnectForever, RetryPolicy};
use padlink_host::infrastructure::signaling::mock::LoopbackRelay;
use padlink_host::infrastructure::signaling::SignalingChannel;
use padlink_host::LinkError;

struct Harness {
    relay: Arc<LoopbackRelay>,
    signaling: Arc<SignalingChannel>,
    connector: Arc<MockConnector>,
    control: MockControl,
}

fn harness() -> Harness {
    let (relay, incoming) = LoopbackRelay::new();
    let signaling = SignalingChannel::new(Arc::clone(&relay) as _, incoming);
    let (connector, control) = MockConnector::new();
    Harness {
        relay,
        signaling,
        connector,
        control,
    }
}

fn candidate(tag: &str) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{tag} 1 udp 2122260223 192.168.1.10 54321 typ host"),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    }
}

fn offer(sdp: &str) -> SignalMessage {
    SignalMessage::Offer {
        sdp: sdp.to_string(),
    }
}

async fn wait_joined(relay: &LoopbackRelay, id: &LinkId) {
    for _ in 0..1_000 {
        if relay.is_joined(id) {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("link never joined relay channel {id}");
}

async fn wait_for_state(link: &PeerLink, wanted: ConnectionState) {
    let mut watch = link.watch_state();
    watch
        .wait_for(|state| *state == wanted)
        .await
        .expect("state watcher closed");
}

/// Spawns `PeerLink::connect` and plays the controller through a complete
/// negotiation. Returns the open link, the endpoint handle, and the channel
/// driver.
async fn connect_link(
    harness: &mut Harness,
    id: &str,
    retry: Arc<dyn RetryPolicy>,
) -> (Arc<PeerLink>, MockEndpointHandle, MemoryChannelDriver) {
    let link_id = LinkId::new(id);
    let connect = tokio::spawn({
        let signaling = Arc::clone(&harness.signaling);
        let connector = Arc::clone(&harness.connector) as _;
        let link_id = link_id.clone();
        async move { PeerLink::connect(link_id, signaling, connector, retry).await }
    });

    let mut endpoint = harness.control.next_endpoint().await;
    wait_joined(&harness.relay, &link_id).await;
    harness.relay.inject(&link_id, offer("v=0 controller offer"));
    endpoint.wait_remote_offer().await;
    endpoint.wait_answer().await;
    let driver = endpoint.open_channel(4096, true).await;

    let link = connect.await.expect("connect task panicked").expect("connect failed");
    (link, endpoint, driver)
}

// ── Negotiation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_link_opens_after_offer_answer_and_channel_ready() {
    let mut harness = harness();
    let (link, _endpoint, _driver) =
        connect_link(&mut harness, "p1", Arc::new(ReconnectForever)).await;

    assert_eq!(link.state(), ConnectionState::Open);
    assert_eq!(link.id(), &LinkId::new("p1"));

    // The link answered through the relay.
    let published = harness.relay.published();
    assert!(
        published
            .iter()
            .any(|(id, message)| id == &LinkId::new("p1")
                && matches!(message, SignalMessage::Answer { .. })),
        "the link must publish its answer, got: {published:?}"
    );
}

#[tokio::test]
async fn test_candidates_before_offer_are_buffered_then_applied() {
    let mut harness = harness();
    let link_id = LinkId::new("p1");

    let connect = tokio::spawn({
        let signaling = Arc::clone(&harness.signaling);
        let connector = Arc::clone(&harness.connector) as _;
        let link_id = link_id.clone();
        async move {
            PeerLink::connect(link_id, signaling, connector, Arc::new(ReconnectForever)).await
        }
    });

    let mut endpoint = harness.control.next_endpoint().await;
    wait_joined(&harness.relay, &link_id).await;

    // Candidates race ahead of the offer. The mock endpoint rejects any
    // candidate applied before the remote description, so buffering bugs
    // fail loudly here.
    for tag in ["early-a", "early-b"] {
        harness.relay.inject(
            &link_id,
            SignalMessage::Candidate {
                mark: "controller-mark".to_string(),
                data: candidate(tag),
            },
        );
    }
    harness.relay.inject(&link_id, offer("v=0 late offer"));

    endpoint.wait_remote_offer().await;
    endpoint.wait_answer().await;

    // Both buffered candidates were replayed after the offer, in order.
    assert_eq!(
        endpoint.applied_candidates(),
        vec![candidate("early-a"), candidate("early-b")]
    );

    let _driver = endpoint.open_channel(4096, true).await;
    connect.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_own_marker_candidates_are_ignored() {
    let mut harness = harness();
    let (_link, endpoint, _driver) =
        connect_link(&mut harness, "p1", Arc::new(ReconnectForever)).await;

    // The endpoint gathers a local candidate; the link publishes it with its
    // own marker and the relay loops it straight back.
    endpoint.emit_candidate(candidate("local")).await;

    let link_id = LinkId::new("p1");
    let mut published_mark = None;
    for _ in 0..1_000 {
        if let Some((_, SignalMessage::Candidate { mark, .. })) = harness
            .relay
            .published()
            .into_iter()
            .find(|(id, message)| id == &link_id && matches!(message, SignalMessage::Candidate { .. }))
        {
            published_mark = Some(mark);
            break;
        }
        tokio::task::yield_now().await;
    }
    let published_mark = published_mark.expect("local candidate must be published");
    assert!(!published_mark.is_empty());

    // The looped-back publish carries our own marker and must not be applied.
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    assert!(
        endpoint.applied_candidates().is_empty(),
        "own candidates must never be applied locally"
    );
}

#[tokio::test]
async fn test_foreign_candidates_after_open_are_applied() {
    let mut harness = harness();
    let (_link, endpoint, _driver) =
        connect_link(&mut harness, "p1", Arc::new(ReconnectForever)).await;

    harness.relay.inject(
        &LinkId::new("p1"),
        SignalMessage::Candidate {
            mark: "controller-mark".to_string(),
            data: candidate("trickled"),
        },
    );

    for _ in 0..1_000 {
        if !endpoint.applied_candidates().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(endpoint.applied_candidates(), vec![candidate("trickled")]);
}

#[tokio::test]
async fn test_initial_setup_failure_rejects_connect() {
    let harness = harness();
    harness.connector.fail_next("no route to host");

    let result = PeerLink::connect(
        LinkId::new("p1"),
        Arc::clone(&harness.signaling),
        Arc::clone(&harness.connector) as _,
        Arc::new(ReconnectForever),
    )
    .await;

    assert!(matches!(result, Err(LinkError::Transport(_))));
}

// ── Reconnection ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reconnection_preserves_link_identity() {
    let mut harness = harness();
    let (link, _endpoint1, driver1) =
        connect_link(&mut harness, "p1", Arc::new(ReconnectForever)).await;
    assert_eq!(link.state(), ConnectionState::Open);

    // The transport drops; the link reconnects from AwaitingRemoteOffer with
    // a fresh attempt, the same LinkId, and the same link object.
    driver1.close();

    let mut endpoint2 = harness.control.next_endpoint().await;
    harness
        .relay
        .inject(&LinkId::new("p1"), offer("v=0 second offer"));
    endpoint2.wait_remote_offer().await;
    endpoint2.wait_answer().await;
    let mut driver2 = endpoint2.open_channel(4096, true).await;

    wait_for_state(&link, ConnectionState::Open).await;
    assert_eq!(link.id(), &LinkId::new("p1"));

    // The same public object sends over the replacement channel.
    link.send_text("{\"type\":\"ping\",\"payload\":{}}")
        .await
        .unwrap();
    assert!(matches!(
        driver2.next_sent().await,
        Some(ChannelMessage::Text(text)) if text.contains("ping")
    ));
    assert_eq!(harness.connector.attempts(), 2);
}

#[tokio::test]
async fn test_each_reconnect_attempt_uses_a_fresh_marker() {
    let mut harness = harness();
    let (link, endpoint1, driver1) =
        connect_link(&mut harness, "p1", Arc::new(ReconnectForever)).await;

    endpoint1.emit_candidate(candidate("first-attempt")).await;
    let first_mark = wait_published_mark(&harness.relay).await;

    driver1.close();
    let mut endpoint2 = harness.control.next_endpoint().await;
    harness.relay.inject(&LinkId::new("p1"), offer("v=0 again"));
    endpoint2.wait_remote_offer().await;
    endpoint2.wait_answer().await;
    let _driver2 = endpoint2.open_channel(4096, true).await;
    wait_for_state(&link, ConnectionState::Open).await;

    endpoint2.emit_candidate(candidate("second-attempt")).await;
    let second_mark = wait_published_mark_after(&harness.relay, 1).await;

    assert_ne!(first_mark, second_mark, "reconnects must rotate the marker");
}

async fn wait_published_mark(relay: &LoopbackRelay) -> String {
    wait_published_mark_after(relay, 0).await
}

/// Waits for the `skip + 1`-th published candidate and returns its marker.
async fn wait_published_mark_after(relay: &LoopbackRelay, skip: usize) -> String {
    for _ in 0..1_000 {
        let marks: Vec<String> = relay
            .published()
            .into_iter()
            .filter_map(|(_, message)| match message {
                SignalMessage::Candidate { mark, .. } => Some(mark),
                _ => None,
            })
            .collect();
        if marks.len() > skip {
            return marks[skip].clone();
        }
        tokio::task::yield_now().await;
    }
    panic!("expected candidate number {} to be published", skip + 1);
}

#[tokio::test]
async fn test_disconnect_is_terminal_and_suppresses_reconnection() {
    let mut harness = harness();
    let (link, endpoint, _driver) =
        connect_link(&mut harness, "p1", Arc::new(ReconnectForever)).await;

    link.disconnect().await;
    wait_for_state(&link, ConnectionState::Closed).await;

    // The supervisor notices the close, releases the endpoint, and exits
    // without opening a new attempt.
    for _ in 0..1_000 {
        if endpoint.is_closed() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(endpoint.is_closed(), "endpoint must be released");
    assert!(
        harness.control.try_next_endpoint().is_none(),
        "disconnect must not trigger a new negotiation attempt"
    );
    assert_eq!(harness.connector.attempts(), 1);
    assert!(matches!(
        link.send_text("{}").await,
        Err(LinkError::NotConnected)
    ));
}

#[tokio::test]
async fn test_bounded_retry_policy_stops_after_failed_attempts() {
    let mut harness = harness();
    let (link, _endpoint, driver) = connect_link(
        &mut harness,
        "p1",
        Arc::new(BoundedRetries {
            max_attempts: 1,
            delay: Duration::ZERO,
        }),
    )
    .await;

    // The single allowed reconnect attempt fails at endpoint construction;
    // the supervisor then gives up instead of looping forever.
    harness.connector.fail_next("interface down");
    driver.close();

    wait_for_state(&link, ConnectionState::Closed).await;
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    assert_eq!(harness.connector.attempts(), 1, "no second endpoint opened");
    assert!(harness.control.try_next_endpoint().is_none());
}

// ── Control plane over the channel ────────────────────────────────────────────

#[tokio::test]
async fn test_inbound_control_envelope_resolves_once_waiter() {
    let mut harness = harness();
    let (link, _endpoint, driver) =
        connect_link(&mut harness, "p1", Arc::new(ReconnectForever)).await;

    let reply = link.once_control("start_confirm");
    driver
        .inject_text(
            &serde_json::to_string(&ControlEnvelope::new(
                "start_confirm",
                serde_json::json!({}),
            ))
            .unwrap(),
        )
        .await;

    assert_eq!(reply.recv().await.unwrap().kind, "start_confirm");
}

#[tokio::test]
async fn test_reconnect_after_disconnect_reuses_the_same_link() {
    let mut harness = harness();
    let (link, _endpoint1, _driver1) =
        connect_link(&mut harness, "p1", Arc::new(ReconnectForever)).await;

    link.disconnect().await;
    assert_eq!(link.state(), ConnectionState::Closed);

    // A deliberate reconnect re-runs the whole negotiation on the same id.
    let reconnecting = tokio::spawn({
        let link = Arc::clone(&link);
        async move { link.reconnect().await }
    });

    let mut endpoint2 = harness.control.next_endpoint().await;
    harness
        .relay
        .inject(&LinkId::new("p1"), offer("v=0 after disconnect"));
    endpoint2.wait_remote_offer().await;
    endpoint2.wait_answer().await;
    let mut driver2 = endpoint2.open_channel(4096, true).await;

    reconnecting.await.unwrap().unwrap();
    assert_eq!(link.state(), ConnectionState::Open);

    link.send_text("{\"type\":\"hello\",\"payload\":{}}")
        .await
        .unwrap();
    assert!(matches!(
        driver2.next_sent().await,
        Some(ChannelMessage::Text(text)) if text.contains("hello")
    ));
}

#[tokio::test]
async fn test_reconnect_while_active_is_rejected() {
    let mut harness = harness();
    let (link, _endpoint, _driver) =
        connect_link(&mut harness, "p1", Arc::new(ReconnectForever)).await;

    let result = Arc::clone(&link).reconnect().await;
    assert!(matches!(result, Err(LinkError::Transport(_))));
    assert_eq!(link.state(), ConnectionState::Open);
}

#[tokio::test]
async fn test_once_waiter_pending_across_disconnect_is_cancelled() {
    let mut harness = harness();
    let (link, _endpoint, _driver) =
        connect_link(&mut harness, "p1", Arc::new(ReconnectForever)).await;

    let reply = link.once_control("config_confirm");
    link.disconnect().await;

    assert!(matches!(reply.recv().await, Err(LinkError::Cancelled)));
}
