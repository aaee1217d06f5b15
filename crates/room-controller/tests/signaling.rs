//! Signaling-level behavior over the room RPC surface: pass-through
//! methods, lifecycle notifications driven by engine events, and protocol
//! robustness.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

mod common;

use common::start_server;
use media_engine::events::{ConsumerEvent, IceState, ProducerEvent, TransportEvent};
use serde_json::{json, Value};
use signal_protocol::{codec, Message};

#[tokio::test]
async fn test_router_rtp_capabilities_before_join() {
    let server = start_server().await;
    let mut alice = server.connect("r1", "alice").await;

    let capabilities = alice
        .request("getRouterRtpCapabilities", Value::Null)
        .await
        .unwrap();
    let codecs = capabilities.get("codecs").and_then(Value::as_array).unwrap();
    assert!(!codecs.is_empty());
}

#[tokio::test]
async fn test_server_version_announced_on_connect() {
    let server = start_server().await;
    let mut alice = server.connect("r1", "alice").await;

    let version = alice.expect_notify("serverVersion").await;
    assert!(version
        .get("version")
        .and_then(Value::as_str)
        .is_some_and(|v| v.starts_with("loopback/")));
}

#[tokio::test]
async fn test_unknown_method_yields_404() {
    let server = start_server().await;
    let mut alice = server.connect("r1", "alice").await;

    let error = alice.request("definitelyNotAMethod", Value::Null).await.unwrap_err();
    assert_eq!(error, (404, "unknown method".to_string()));
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let server = start_server().await;
    let mut alice = server.connect("r1", "alice").await;

    alice.transport.read("not json at all");
    alice.transport.read("[2, 3, 1, 1]");
    alice.transport.read(r#"[1, 9]"#);
    assert!(!alice.transport.is_closed());

    // The connection keeps working afterwards.
    let capabilities = alice
        .request("getRouterRtpCapabilities", Value::Null)
        .await
        .unwrap();
    assert!(capabilities.is_object());
}

#[tokio::test]
async fn test_ping_is_answered() {
    let server = start_server().await;
    let alice = server.connect("r1", "alice").await;

    alice.transport.read(&codec::encode(&Message::Ping {
        payload: Vec::new(),
    }));
    // The pong lands on the outbound channel along with the serverVersion
    // notify; the transport-level unit tests cover exact matching. Nothing
    // to assert here beyond the transport staying open.
    assert!(!alice.transport.is_closed());
}

#[tokio::test]
async fn test_transport_connect_restart_ice_and_stats() {
    let server = start_server().await;
    let mut alice = server.connect("r1", "alice").await;
    let transport_id = alice.create_transport(true, false).await;

    let connected = alice
        .request(
            "connectWebRtcTransport",
            json!({"transportId": transport_id, "dtlsParameters": {"role": "client"}}),
        )
        .await
        .unwrap();
    assert_eq!(connected, json!(true));

    let ice = alice
        .request("restartIce", json!({"transportId": transport_id}))
        .await
        .unwrap();
    assert!(ice.get("usernameFragment").is_some());

    let stats = alice
        .request("getTransportStats", json!({"transportId": transport_id}))
        .await
        .unwrap();
    assert!(stats.is_array());

    let error = alice
        .request("getTransportStats", json!({"transportId": "missing"}))
        .await
        .unwrap_err();
    assert_eq!(error.0, 500);
    assert_eq!(error.1, "transport with id \"missing\" not found");
}

#[tokio::test]
async fn test_change_display_name_notifies_others() {
    let server = start_server().await;

    let mut alice = server.connect("r1", "alice").await;
    alice.join_as("Alice").await;
    let mut bob = server.connect("r1", "bob").await;
    bob.join_as("Bob").await;
    alice.expect_notify("newPeer").await;

    let result = bob
        .request("changeDisplayName", json!({"displayName": "Robert"}))
        .await
        .unwrap();
    assert_eq!(result, json!(true));

    let changed = alice.expect_notify("peerDisplayNameChanged").await;
    assert_eq!(changed.get("peerId"), Some(&json!("bob")));
    assert_eq!(changed.get("displayName"), Some(&json!("Robert")));
    assert_eq!(changed.get("oldDisplayName"), Some(&json!("Bob")));
}

#[tokio::test]
async fn test_active_speaker_notifications() {
    let server = start_server().await;

    let mut alice = server.connect("r1", "alice").await;
    alice.join_as("Alice").await;
    let transport_id = alice.create_transport(true, false).await;
    let producer_id = alice.produce_audio(&transport_id).await;

    assert!(server.engine.emit_volumes(&producer_id, -42) > 0);
    let speaker = alice.expect_notify("activeSpeaker").await;
    assert_eq!(speaker.get("peerId"), Some(&json!("alice")));
    assert_eq!(speaker.get("volume"), Some(&json!(-42)));

    assert!(server.engine.emit_silence() > 0);
    let silence = alice.expect_notify("activeSpeaker").await;
    assert_eq!(silence.get("peerId"), Some(&json!(null)));
}

#[tokio::test]
async fn test_producer_score_event_forwarded() {
    let server = start_server().await;

    let mut alice = server.connect("r1", "alice").await;
    alice.join_as("Alice").await;
    let transport_id = alice.create_transport(true, false).await;
    let producer_id = alice.produce_audio(&transport_id).await;

    assert!(server
        .engine
        .emit_producer_event(&producer_id, ProducerEvent::Score(json!([{"score": 8}]))));

    let score = alice.expect_notify("producerScore").await;
    assert_eq!(score.get("producerId"), Some(&json!(producer_id)));
    assert_eq!(score.get("score"), Some(&json!([{"score": 8}])));
}

#[tokio::test]
async fn test_consumer_lifecycle_events_forwarded() {
    let server = start_server().await;

    let mut alice = server.connect("r1", "alice").await;
    alice.join_as("Alice").await;
    let alice_transport = alice.create_transport(true, false).await;

    let mut bob = server.connect("r1", "bob").await;
    bob.create_transport(false, true).await;
    bob.join_as("Bob").await;
    alice.expect_notify("newPeer").await;

    alice.produce_video(&alice_transport).await;
    let (seq, args) = bob.expect_request("newConsumer").await;
    let consumer_id = args[0]
        .get("id")
        .and_then(Value::as_str)
        .unwrap()
        .to_string();
    bob.respond_success(seq, Value::Null);
    bob.expect_notify("consumerScore").await;

    assert!(server
        .engine
        .emit_consumer_event(&consumer_id, ConsumerEvent::ProducerPause));
    let paused = bob.expect_notify("consumerPaused").await;
    assert_eq!(paused.get("consumerId"), Some(&json!(consumer_id)));

    assert!(server
        .engine
        .emit_consumer_event(&consumer_id, ConsumerEvent::ProducerResume));
    let resumed = bob.expect_notify("consumerResumed").await;
    assert_eq!(resumed.get("consumerId"), Some(&json!(consumer_id)));

    assert!(server
        .engine
        .emit_consumer_event(&consumer_id, ConsumerEvent::ProducerClose));
    let closed = bob.expect_notify("consumerClosed").await;
    assert_eq!(closed.get("consumerId"), Some(&json!(consumer_id)));
    assert_eq!(server.engine.resource_closed(&consumer_id), Some(true));
}

#[tokio::test]
async fn test_peer_leave_closes_dependent_consumers() {
    let server = start_server().await;

    let mut alice = server.connect("r1", "alice").await;
    alice.join_as("Alice").await;
    let alice_transport = alice.create_transport(true, false).await;

    let mut bob = server.connect("r1", "bob").await;
    bob.create_transport(false, true).await;
    bob.join_as("Bob").await;
    alice.expect_notify("newPeer").await;

    let producer_id = alice.produce_video(&alice_transport).await;
    let (seq, args) = bob.expect_request("newConsumer").await;
    let consumer_id = args[0]
        .get("id")
        .and_then(Value::as_str)
        .unwrap()
        .to_string();
    bob.respond_success(seq, Value::Null);
    bob.expect_notify("consumerScore").await;

    // The producing peer leaves: its producer closes, and so does Bob's
    // consumer of it.
    alice.disconnect().await;
    let closed_peer = bob.expect_notify("peerClosed").await;
    assert_eq!(closed_peer.get("peerId"), Some(&json!("alice")));
    let closed_consumer = bob.expect_notify("consumerClosed").await;
    assert_eq!(closed_consumer.get("consumerId"), Some(&json!(consumer_id)));

    assert_eq!(server.engine.resource_closed(&producer_id), Some(true));
    assert_eq!(server.engine.resource_closed(&consumer_id), Some(true));
}

#[tokio::test]
async fn test_ice_failure_closes_peer() {
    let server = start_server().await;

    let mut alice = server.connect("r1", "alice").await;
    alice.join_as("Alice").await;
    let transport_id = alice.create_transport(true, false).await;

    let mut bob = server.connect("r1", "bob").await;
    bob.join_as("Bob").await;
    alice.expect_notify("newPeer").await;

    assert!(server.engine.emit_transport_event(
        &transport_id,
        TransportEvent::IceStateChange(IceState::Disconnected)
    ));

    let closed = bob.expect_notify("peerClosed").await;
    assert_eq!(closed.get("peerId"), Some(&json!("alice")));
    assert_eq!(server.engine.resource_closed(&transport_id), Some(true));
}

#[tokio::test]
async fn test_downlink_bwe_trace_notification() {
    let server = start_server().await;

    let mut alice = server.connect("r1", "alice").await;
    alice.join_as("Alice").await;
    let transport_id = alice.create_transport(true, false).await;

    assert!(server.engine.emit_transport_event(
        &transport_id,
        TransportEvent::Trace(json!({
            "type": "bwe",
            "direction": "out",
            "info": {
                "desiredBitrate": 900_000,
                "effectiveDesiredBitrate": 850_000,
                "availableBitrate": 700_000,
            },
        }))
    ));

    let bwe = alice.expect_notify("downlinkBwe").await;
    assert_eq!(bwe.get("desiredBitrate"), Some(&json!(900_000)));
    assert_eq!(bwe.get("availableBitrate"), Some(&json!(700_000)));
}

#[tokio::test]
async fn test_consumer_pause_resume_round_trip() {
    let server = start_server().await;

    let mut alice = server.connect("r1", "alice").await;
    alice.join_as("Alice").await;
    let alice_transport = alice.create_transport(true, false).await;

    let mut bob = server.connect("r1", "bob").await;
    bob.create_transport(false, true).await;
    bob.join_as("Bob").await;
    alice.expect_notify("newPeer").await;

    alice.produce_video(&alice_transport).await;
    let (seq, args) = bob.expect_request("newConsumer").await;
    let consumer_id = args[0]
        .get("id")
        .and_then(Value::as_str)
        .unwrap()
        .to_string();
    bob.respond_success(seq, Value::Null);
    bob.expect_notify("consumerScore").await;

    bob.request("pauseConsumer", json!({"consumerId": consumer_id}))
        .await
        .unwrap();
    assert_eq!(server.engine.consumer_paused(&consumer_id), Some(true));

    bob.request("resumeConsumer", json!({"consumerId": consumer_id}))
        .await
        .unwrap();
    assert_eq!(server.engine.consumer_paused(&consumer_id), Some(false));

    bob.request("requestConsumerKeyFrame", json!({"consumerId": consumer_id}))
        .await
        .unwrap();

    let stats = bob
        .request("getConsumerStats", json!({"consumerId": consumer_id}))
        .await
        .unwrap();
    assert!(stats.is_array());

    let error = bob
        .request("pauseConsumer", json!({"consumerId": "missing"}))
        .await
        .unwrap_err();
    assert_eq!(error.1, "consumer with id \"missing\" not found");
}

#[tokio::test]
async fn test_network_throttle_is_log_only() {
    let server = start_server().await;
    let mut alice = server.connect("r1", "alice").await;

    alice
        .request(
            "applyNetworkThrottle",
            json!({"uplink": 500, "downlink": 600, "rtt": 40, "packetLoss": 2}),
        )
        .await
        .unwrap();
    alice
        .request("resetNetworkThrottle", Value::Null)
        .await
        .unwrap();
}
